//! IPTables Manager (spec.md §4.3b): reconciles a single named chain
//! holding exactly the NAT/masquerade rules implied by the current
//! `ClusterConfig`, leaving every other chain untouched.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use crate::errors::ReconcileError;
use crate::model::ClusterConfig;

use super::backend::{IpTablesBackend, IpTablesRule};

pub struct IpTablesManager {
    backend: Arc<dyn IpTablesBackend>,
}

impl IpTablesManager {
    pub fn new(backend: Arc<dyn IpTablesBackend>) -> Self {
        IpTablesManager { backend }
    }

    pub async fn observe(&self) -> Result<Vec<IpTablesRule>, ReconcileError> {
        Ok(self.backend.observe().await?)
    }

    /// One rule per `(VIP, port)` pair across both address families.
    pub fn desired(&self, config: &ClusterConfig) -> Vec<IpTablesRule> {
        let mut rules = Vec::new();
        for v6 in [false, true] {
            for (vip, ports) in config.vips(v6) {
                for (port_str, svc_def) in ports {
                    if let Ok(port) = port_str.parse::<u16>() {
                        rules.push(IpTablesRule {
                            vip: vip.clone(),
                            port,
                            protocol: svc_def.ipvs_options.protocol,
                        });
                    }
                }
            }
        }
        rules
    }

    /// Adds missing rules, purges rules in the managed chain absent from
    /// `desired`.
    pub async fn apply(
        &self,
        desired: &[IpTablesRule],
        observed: &[IpTablesRule],
    ) -> Result<(), ReconcileError> {
        let desired_set: BTreeSet<&IpTablesRule> = desired.iter().collect();
        let observed_set: BTreeSet<&IpTablesRule> = observed.iter().collect();

        for rule in desired_set.difference(&observed_set) {
            info!(chain = self.backend.chain_name(), vip = %rule.vip, port = rule.port, "adding iptables rule");
            self.backend.add_rule(rule).await?;
        }
        for rule in observed_set.difference(&desired_set) {
            info!(chain = self.backend.chain_name(), vip = %rule.vip, port = rule.port, "purging stale iptables rule");
            self.backend.remove_rule(rule).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::IpTablesError;
    use crate::model::{IpvsOptions, PortMap, Protocol, ServiceDef};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeIpTablesBackend {
        rules: Mutex<BTreeSet<IpTablesRule>>,
    }

    #[async_trait]
    impl IpTablesBackend for FakeIpTablesBackend {
        fn chain_name(&self) -> &str {
            "KUBE-LVS-CTL"
        }
        async fn observe(&self) -> Result<Vec<IpTablesRule>, IpTablesError> {
            Ok(self.rules.lock().unwrap().iter().cloned().collect())
        }
        async fn add_rule(&self, rule: &IpTablesRule) -> Result<(), IpTablesError> {
            self.rules.lock().unwrap().insert(rule.clone());
            Ok(())
        }
        async fn remove_rule(&self, rule: &IpTablesRule) -> Result<(), IpTablesError> {
            self.rules.lock().unwrap().remove(rule);
            Ok(())
        }
    }

    fn config_with_vip(vip: &str, port: &str) -> ClusterConfig {
        let mut ports = PortMap::new();
        ports.insert(
            port.to_string(),
            ServiceDef {
                namespace: "default".into(),
                service: "web".into(),
                port_name: "http".into(),
                ipvs_options: IpvsOptions {
                    protocol: Protocol::Tcp,
                    ..Default::default()
                },
            },
        );
        let mut c = ClusterConfig::default();
        c.config.insert(vip.to_string(), ports);
        c
    }

    #[tokio::test]
    async fn apply_adds_and_purges_minimally() {
        let backend = Arc::new(FakeIpTablesBackend::default());
        let mgr = IpTablesManager::new(backend.clone());

        let config = config_with_vip("10.0.0.1", "80");
        let desired = mgr.desired(&config);
        let observed = mgr.observe().await.unwrap();
        mgr.apply(&desired, &observed).await.unwrap();
        assert_eq!(mgr.observe().await.unwrap().len(), 1);

        let empty = ClusterConfig::default();
        let desired = mgr.desired(&empty);
        let observed = mgr.observe().await.unwrap();
        mgr.apply(&desired, &observed).await.unwrap();
        assert!(mgr.observe().await.unwrap().is_empty());
    }
}
