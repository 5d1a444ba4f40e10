//! BGP Controller Adapter (spec.md §4.7): a thin, stateless façade over
//! an external BGP speaker. Idempotent by contract — the backend, not
//! this wrapper, is responsible for that guarantee; this type only
//! forwards calls and classifies errors.

use std::sync::Arc;

use crate::errors::ReconcileError;

use super::backend::BgpBackend;

pub struct BgpAdapter {
    backend: Arc<dyn BgpBackend>,
    communities: Vec<String>,
}

impl BgpAdapter {
    pub fn new(backend: Arc<dyn BgpBackend>, communities: Vec<String>) -> Self {
        BgpAdapter { backend, communities }
    }

    pub async fn get(&self) -> Result<Vec<String>, ReconcileError> {
        Ok(self.backend.get().await?)
    }

    /// Additive-only in the steady path (spec.md §4.5): `v4_addresses`
    /// is the union of currently desired VIPs; withdrawals are left to
    /// the BGP session's natural timeout and to the next forced
    /// reconcile.
    pub async fn set(&self, v4_addresses: &[String], previously_announced: &[String]) -> Result<(), ReconcileError> {
        Ok(self
            .backend
            .set(v4_addresses, previously_announced, &self.communities)
            .await?)
    }

    pub async fn set_v6(&self, v6_addresses: &[String]) -> Result<(), ReconcileError> {
        Ok(self.backend.set_v6(v6_addresses, &self.communities).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BgpError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBgpBackend {
        announced: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BgpBackend for FakeBgpBackend {
        async fn get(&self) -> Result<Vec<String>, BgpError> {
            Ok(self.announced.lock().unwrap().clone())
        }
        async fn set(&self, v4: &[String], _prev: &[String], _communities: &[String]) -> Result<(), BgpError> {
            *self.announced.lock().unwrap() = v4.to_vec();
            Ok(())
        }
        async fn set_v6(&self, _v6: &[String], _communities: &[String]) -> Result<(), BgpError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn set_is_idempotent() {
        let backend = Arc::new(FakeBgpBackend::default());
        let adapter = BgpAdapter::new(backend.clone(), vec!["65000:100".to_string()]);
        let vips = vec!["10.0.0.1".to_string()];
        adapter.set(&vips, &[]).await.unwrap();
        let after_first = adapter.get().await.unwrap();
        adapter.set(&vips, &after_first).await.unwrap();
        let after_second = adapter.get().await.unwrap();
        assert_eq!(after_first, after_second);
    }
}
