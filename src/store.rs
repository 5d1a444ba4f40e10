//! The Cluster State Store (spec.md §4.1): the only shared mutable state
//! between watch-consumer tasks and the Reconciler Loop. An
//! `Arc<Mutex<..>>` updated only by short critical sections inside the
//! watch tasks and read the same way by the reconciler and HTTP
//! handlers; the mutex is held only across field assignment/snapshot
//! copies, never across I/O.

use std::sync::Mutex;
use std::time::Instant;

use crate::model::{nodes_equal, ClusterConfig, NodesList, ServicesIndex};

/// Immutable view handed to the reconciler. Cheap to clone because the
/// store never holds a snapshot open across I/O.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub config: ClusterConfig,
    pub nodes: NodesList,
    pub services: ServicesIndex,
}

struct Inner {
    config: ClusterConfig,
    nodes: NodesList,
    services: ServicesIndex,
    last_inbound_update: Option<Instant>,
    last_reconcile: Option<Instant>,
    new_config_flag: bool,
}

pub struct ClusterStateStore {
    inner: Mutex<Inner>,
}

impl Default for ClusterStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStateStore {
    pub fn new() -> Self {
        ClusterStateStore {
            inner: Mutex::new(Inner {
                config: ClusterConfig::default(),
                nodes: NodesList::default(),
                services: ServicesIndex::default(),
                last_inbound_update: None,
                last_reconcile: None,
                new_config_flag: false,
            }),
        }
    }

    /// Replaces `config`, stamps `last_inbound_update`, and arms
    /// `new_config_flag` so the next tick forces a reconcile.
    pub fn apply_config(&self, config: ClusterConfig) {
        let mut inner = self.inner.lock().unwrap();
        inner.config = config;
        inner.last_inbound_update = Some(Instant::now());
        inner.new_config_flag = true;
    }

    /// Replaces `nodes` unless `n` is semantically equal to the held
    /// list (spec.md §3's `NodesEqual`), in which case this is a no-op
    /// and the caller should record a `NodeUpdate("noop")` metric
    /// (scenario S6).
    ///
    /// Returns `true` if the list was replaced, `false` if it was a
    /// no-op.
    pub fn apply_nodes(&self, nodes: NodesList) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if nodes_equal(&inner.nodes, &nodes) {
            return false;
        }
        inner.nodes = nodes;
        inner.last_inbound_update = Some(Instant::now());
        true
    }

    /// Replaces the cached Service->clusterIP:port index, recomputed in
    /// full on each Service watch delivery (spec.md §9 Design Notes).
    pub fn apply_services(&self, services: ServicesIndex) {
        let mut inner = self.inner.lock().unwrap();
        inner.services = services;
    }

    /// An internally-consistent `(config, nodes, services)` view. Never
    /// observes a partially-updated config because the lock is held only
    /// for the duration of the clone.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock().unwrap();
        Snapshot {
            config: inner.config.clone(),
            nodes: inner.nodes.clone(),
            services: inner.services.clone(),
        }
    }

    /// Atomically tests-and-clears `new_config_flag`.
    pub fn consume_new_config(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.new_config_flag)
    }

    pub fn stamp_reconcile(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_reconcile = Some(Instant::now());
    }

    /// `lastReconcile > lastInboundUpdate` (spec.md §4.5): when true, the
    /// fast tick may skip even the parity check.
    pub fn no_updates_ready(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        match (inner.last_reconcile, inner.last_inbound_update) {
            (Some(r), Some(u)) => r > u,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    #[test]
    fn apply_nodes_noop_on_semantic_equality() {
        let store = ClusterStateStore::new();
        let nodes = NodesList(vec![Node {
            name: "n1".into(),
            addresses: vec!["10.0.0.5".into()],
            unschedulable: false,
            endpoints: vec![],
        }]);
        assert!(store.apply_nodes(nodes.clone()));
        // Same content, different Vec instance / order -> no-op.
        assert!(!store.apply_nodes(NodesList(nodes.0.clone())));
    }

    #[test]
    fn consume_new_config_is_test_and_clear() {
        let store = ClusterStateStore::new();
        store.apply_config(ClusterConfig::default());
        assert!(store.consume_new_config());
        assert!(!store.consume_new_config());
    }

    #[test]
    fn no_updates_ready_requires_both_timestamps() {
        let store = ClusterStateStore::new();
        assert!(!store.no_updates_ready());
        store.apply_config(ClusterConfig::default());
        assert!(!store.no_updates_ready());
        store.stamp_reconcile();
        assert!(store.no_updates_ready());
    }
}
