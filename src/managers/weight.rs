//! Destination weight computation (spec.md §3 `Weight`).

use crate::model::{Node, NodesList, ServiceDef};

/// `weight = podsOnNode` unless a global weight override is set, in which
/// case `weight = override`. A cordoned node contributes weight 0 unless
/// `ignore_cordon` is set.
///
/// `pods_on_node` is currently always 1 (one endpoint entry per node per
/// service — the model doesn't carry per-node pod counts beyond
/// presence), matching spec.md §3's description of the base case.
pub fn destination_weight(node: &Node, svc: &ServiceDef) -> u32 {
    if node.unschedulable && !svc.ipvs_options.ignore_cordon {
        return 0;
    }
    svc.ipvs_options.weight_override.unwrap_or(1)
}

/// Total weight across all destinations a service would receive given
/// `nodes`, used by the weight-monotonicity property test (spec.md §8.5).
pub fn total_weight(nodes: &NodesList, namespace: &str, service: &str, svc: &ServiceDef) -> u32 {
    nodes
        .nodes_for_service(namespace, service)
        .map(|n| destination_weight(n, svc))
        .sum()
}
