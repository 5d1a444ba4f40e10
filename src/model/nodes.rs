use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A single `(namespace, service)` pair that a node currently hosts at
/// least one ready pod for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct EndpointRef {
    pub namespace: String,
    pub service: String,
    /// At least one subset for this endpoint is in the ready state.
    pub ready: bool,
}

/// One cluster node as delivered by the nodes+endpoints watch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub name: String,
    pub addresses: Vec<String>,
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default)]
    pub endpoints: Vec<EndpointRef>,
}

impl Node {
    /// The address IPVS destinations are keyed on: the first address.
    pub fn primary_address(&self) -> Option<&str> {
        self.addresses.first().map(String::as_str)
    }

    fn endpoint_set(&self) -> BTreeSet<&EndpointRef> {
        self.endpoints.iter().collect()
    }

    /// Whether this node currently hosts a ready endpoint for `(ns, svc)`.
    pub fn hosts_ready(&self, namespace: &str, service: &str) -> bool {
        self.endpoints
            .iter()
            .any(|e| e.namespace == namespace && e.service == service && e.ready)
    }
}

/// Ordered sequence of nodes as delivered by the watch. Equality between
/// two `NodesList`s is defined *semantically* (spec.md §3): same set of
/// node names, same per-node schedulability, same per-node endpoint
/// multiset — insertion order of either the node list or each node's
/// endpoint list is irrelevant.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodesList(pub Vec<Node>);

impl NodesList {
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.0.iter()
    }

    pub fn find(&self, name: &str) -> Option<&Node> {
        self.0.iter().find(|n| n.name == name)
    }

    /// All schedulable (or cordon-ignoring) nodes hosting a ready
    /// endpoint for `(namespace, service)`.
    pub fn nodes_for_service<'a>(
        &'a self,
        namespace: &str,
        service: &str,
    ) -> impl Iterator<Item = &'a Node> {
        self.0
            .iter()
            .filter(move |n| n.hosts_ready(namespace, service))
    }
}

/// Semantic equality per spec.md §3: same node names, same
/// schedulability, same endpoint multiset per node. Permutation of the
/// node vector or any node's endpoint vector must not affect the result.
pub fn nodes_equal(a: &NodesList, b: &NodesList) -> bool {
    if a.0.len() != b.0.len() {
        return false;
    }

    let mut a_sorted: Vec<&Node> = a.0.iter().collect();
    let mut b_sorted: Vec<&Node> = b.0.iter().collect();
    a_sorted.sort_by(|x, y| x.name.cmp(&y.name));
    b_sorted.sort_by(|x, y| x.name.cmp(&y.name));

    a_sorted.iter().zip(b_sorted.iter()).all(|(na, nb)| {
        na.name == nb.name
            && na.unschedulable == nb.unschedulable
            && na.endpoint_set() == nb.endpoint_set()
    })
}
