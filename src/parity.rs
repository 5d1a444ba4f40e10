//! Parity Checker (spec.md §4.4): a pure predicate distinguishing drift
//! from no-op, plus the explicit `should_force_reconcile` the Design
//! Notes ask for (separating the command — clearing `new_config_flag` —
//! from the query).

use crate::managers::{AddressManager, IpvsManager};
use crate::model::{ClusterConfig, NodesList, ObservedAddresses, ObservedIpvs, ServicesIndex};
use crate::store::ClusterStateStore;

/// Reasons a `sameConfig` check found drift, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftReason {
    ForcedByNewConfig,
    AddressMismatch,
    IpvsMismatch(String),
}

/// Real-Server-side half of `sameConfig` (spec.md §4.4): loopback VIPs
/// only. Split from `ipvs_parity` because the two roles never construct
/// both manager kinds (spec.md §9: "NodeRole drives which managers a
/// running process constructs").
pub fn address_parity(
    config: &ClusterConfig,
    observed_addresses: &ObservedAddresses,
    address_mgr: &AddressManager,
    v6: bool,
) -> Result<(), DriftReason> {
    let desired_vips: Vec<String> = config.vips(v6).keys().cloned().collect();
    let diff = address_mgr.diff(observed_addresses.devices(v6), &desired_vips);
    if !diff.to_add.is_empty() || !diff.to_remove.is_empty() {
        return Err(DriftReason::AddressMismatch);
    }
    Ok(())
}

/// Director-side half of `sameConfig` (spec.md §4.4): IPVS virtual
/// services and destinations, minus the `newConfigFlag` side effect
/// (moved to `should_force_reconcile`, called once per tick).
pub fn ipvs_parity(
    nodes: &NodesList,
    config: &ClusterConfig,
    services: &ServicesIndex,
    observed_ipvs: &ObservedIpvs,
    ipvs_mgr: &IpvsManager,
    v6: bool,
) -> Result<(), DriftReason> {
    let desired_ipvs = ipvs_mgr.desired(nodes, config, services);
    for (key, desired_svc) in &desired_ipvs.services {
        match observed_ipvs.get(key) {
            None => return Err(DriftReason::IpvsMismatch(format!("missing service {}:{}", key.vip, key.port))),
            Some(observed_svc) => {
                if observed_svc.destinations != desired_svc.destinations
                    || observed_svc.scheduler != desired_svc.scheduler
                {
                    return Err(DriftReason::IpvsMismatch(format!(
                        "destination/flag mismatch on {}:{}",
                        key.vip, key.port
                    )));
                }
            }
        }
    }
    for key in observed_ipvs.services.keys() {
        if !desired_ipvs.services.contains_key(key) && config.vips(v6).contains_key(&key.vip) {
            return Err(DriftReason::IpvsMismatch(format!(
                "stray observed service {}:{}",
                key.vip, key.port
            )));
        }
    }

    Ok(())
}

/// Explicit, side-effect-only-on-the-store query the reconciler calls
/// once per tick (spec.md §9's command/query split): true exactly once
/// per config delivery.
pub fn should_force_reconcile(store: &ClusterStateStore) -> bool {
    store.consume_new_config()
}
