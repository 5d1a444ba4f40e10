//! Address Manager (spec.md §4.2): reconciles VIPs on loopback and
//! per-VIP MTU overrides, one instance per address family.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::ReconcileError;
use crate::model::{device_name_for_vip, vip_for_device_name};

use super::backend::AddressBackend;

pub struct AddressManager {
    backend: Arc<dyn AddressBackend>,
    v6: bool,
}

/// `(toRemove, toAdd)` by set difference, order-independent.
#[derive(Debug, Default, PartialEq)]
pub struct AddressDiff {
    pub to_remove: Vec<String>,
    pub to_add: Vec<String>,
}

impl AddressManager {
    pub fn new(backend: Arc<dyn AddressBackend>, v6: bool) -> Self {
        AddressManager { backend, v6 }
    }

    pub async fn observe(&self) -> Result<Vec<String>, ReconcileError> {
        Ok(self.backend.observe().await?)
    }

    /// Order-independent diff between observed device names and the
    /// desired VIP set. Empty device names (an unrepresentable VIP) are
    /// silently dropped from `desired` (spec.md §4.2).
    pub fn diff(&self, observed: &[String], desired_vips: &[String]) -> AddressDiff {
        let desired_devices: BTreeMap<String, String> = desired_vips
            .iter()
            .filter_map(|vip| device_name_for_vip(vip, self.v6).map(|d| (d, vip.clone())))
            .collect();

        let observed_set: BTreeSet<&String> = observed.iter().collect();
        let desired_set: BTreeSet<&String> = desired_devices.keys().collect();

        let to_remove = observed_set
            .difference(&desired_set)
            .map(|d| (*d).clone())
            .collect();
        let to_add = desired_set
            .difference(&observed_set)
            .map(|d| desired_devices[*d].clone())
            .collect();

        AddressDiff { to_remove, to_add }
    }

    /// Removes before adds, so a renumbered VIP is reassigned correctly
    /// (spec.md §4.5). A removal error aborts the cycle; additions
    /// already issued stay, the next cycle retries the rest.
    pub async fn apply(&self, diff: &AddressDiff) -> Result<(), ReconcileError> {
        for device in &diff.to_remove {
            match vip_for_device_name(device) {
                Some(vip) => info!(device = %device, vip = %vip, "removing VIP from loopback"),
                None => warn!(device = %device, "removing unrecognized managed device"),
            }
            self.backend.remove(device).await?;
        }
        for vip in &diff.to_add {
            info!(vip = %vip, "adding VIP to loopback");
            self.backend.add(vip).await?;
        }
        Ok(())
    }

    pub async fn set_mtu(&self, desired: &BTreeMap<String, u32>) -> Result<(), ReconcileError> {
        Ok(self.backend.set_mtu(desired).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AddressError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAddressBackend {
        devices: Mutex<BTreeSet<String>>,
        mtus: Mutex<BTreeMap<String, u32>>,
    }

    #[async_trait]
    impl AddressBackend for FakeAddressBackend {
        async fn observe(&self) -> Result<Vec<String>, AddressError> {
            Ok(self.devices.lock().unwrap().iter().cloned().collect())
        }
        async fn add(&self, vip: &str) -> Result<(), AddressError> {
            let device = device_name_for_vip(vip, false)
                .ok_or_else(|| AddressError::Unrepresentable(vip.to_string()))?;
            self.devices.lock().unwrap().insert(device);
            Ok(())
        }
        async fn remove(&self, device: &str) -> Result<(), AddressError> {
            self.devices.lock().unwrap().remove(device);
            Ok(())
        }
        async fn set_mtu(&self, desired: &BTreeMap<String, u32>) -> Result<(), AddressError> {
            let mut mtus = self.mtus.lock().unwrap();
            for (vip, mtu) in desired {
                mtus.insert(vip.clone(), *mtu);
            }
            Ok(())
        }
    }

    #[test]
    fn diff_minimality_equals_symmetric_difference() {
        let mgr = AddressManager::new(Arc::new(FakeAddressBackend::default()), false);
        let observed = vec![
            device_name_for_vip("10.0.0.1", false).unwrap(),
            device_name_for_vip("10.0.0.2", false).unwrap(),
        ];
        let desired = vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()];
        let diff = mgr.diff(&observed, &desired);
        assert_eq!(diff.to_remove.len() + diff.to_add.len(), 2);
        assert_eq!(diff.to_remove, vec![device_name_for_vip("10.0.0.1", false).unwrap()]);
        assert_eq!(diff.to_add, vec!["10.0.0.3".to_string()]);
    }

    #[test]
    fn diff_ignores_unrepresentable_desired_vip() {
        let mgr = AddressManager::new(Arc::new(FakeAddressBackend::default()), false);
        let diff = mgr.diff(&[], &["".to_string(), "10.0.0.1".to_string()]);
        assert_eq!(diff.to_add, vec!["10.0.0.1".to_string()]);
    }

    #[tokio::test]
    async fn apply_then_observe_reaches_parity() {
        let backend = Arc::new(FakeAddressBackend::default());
        let mgr = AddressManager::new(backend.clone(), false);
        let diff = mgr.diff(&[], &["10.0.0.1".to_string()]);
        mgr.apply(&diff).await.unwrap();
        let observed = mgr.observe().await.unwrap();
        assert_eq!(observed, vec![device_name_for_vip("10.0.0.1", false).unwrap()]);
    }

    #[tokio::test]
    async fn idempotent_reapply_emits_no_further_changes() {
        let backend = Arc::new(FakeAddressBackend::default());
        let mgr = AddressManager::new(backend.clone(), false);
        let diff = mgr.diff(&[], &["10.0.0.1".to_string()]);
        mgr.apply(&diff).await.unwrap();

        let observed = mgr.observe().await.unwrap();
        let diff2 = mgr.diff(&observed, &["10.0.0.1".to_string()]);
        assert!(diff2.to_add.is_empty());
        assert!(diff2.to_remove.is_empty());
    }
}
