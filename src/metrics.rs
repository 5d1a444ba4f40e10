//! Metrics Surface (spec.md §2, §8): counters/gauges for each reconcile
//! outcome, exposed only as side effects of the reconciler/coordinator —
//! this module owns no control-flow decisions.
//!
//! Built on a `prometheus::Registry` with an explicit struct constructed
//! once in `main` and threaded through via `Arc`, rather than
//! free-standing `LazyLock` statics, per the Design Notes' "no global
//! state" guidance.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    pub registry: Registry,
    /// Successful reconcile cycles, one increment per `(family)` call
    /// that reaches `stamp_reconcile`.
    pub reconciles_total: IntCounter,
    /// Reconcile errors by kind: "transient" | "config_invalid" | "fatal".
    pub reconcile_errors: IntCounterVec,
    /// Fast ticks that found parity and skipped reconcile entirely.
    pub idempotent_ticks: IntCounter,
    /// Node updates dropped as semantically-equal no-ops (scenario S6).
    pub node_update_noop: IntCounter,
    /// Pending config deliveries not yet reconciled.
    pub queue_depth: IntGauge,
    /// Role Coordinator hysteresis transitions that were deferred
    /// (tries incremented, no Start/Stop decision taken yet).
    pub hazard_total: IntCounter,
    /// Role Coordinator Start/Stop decisions, labeled "start" | "stop".
    pub coordinator_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let reconciles_total = IntCounter::new("reconciles_total", "Total successful reconcile cycles")
            .expect("metric definition is valid");
        registry.register(Box::new(reconciles_total.clone())).expect("metric not yet registered");

        let reconcile_errors = IntCounterVec::new(
            Opts::new("reconcile_errors_total", "Reconcile errors by kind"),
            &["kind"],
        )
        .expect("metric definition is valid");
        registry.register(Box::new(reconcile_errors.clone())).expect("metric not yet registered");

        let idempotent_ticks = IntCounter::new("idempotent_ticks_total", "Fast ticks that found parity")
            .expect("metric definition is valid");
        registry.register(Box::new(idempotent_ticks.clone())).expect("metric not yet registered");

        let node_update_noop = IntCounter::new("node_update_noop_total", "Node updates dropped as semantic no-ops")
            .expect("metric definition is valid");
        registry.register(Box::new(node_update_noop.clone())).expect("metric not yet registered");

        let queue_depth = IntGauge::new("queue_depth", "Pending config deliveries not yet reconciled")
            .expect("metric definition is valid");
        registry.register(Box::new(queue_depth.clone())).expect("metric not yet registered");

        let hazard_total = IntCounter::new("coordinator_hazard_total", "Deferred hysteresis transitions")
            .expect("metric definition is valid");
        registry.register(Box::new(hazard_total.clone())).expect("metric not yet registered");

        let coordinator_transitions = IntCounterVec::new(
            Opts::new("coordinator_transitions_total", "Role Coordinator Start/Stop decisions"),
            &["decision"],
        )
        .expect("metric definition is valid");
        registry.register(Box::new(coordinator_transitions.clone())).expect("metric not yet registered");

        Metrics {
            registry,
            reconciles_total,
            reconcile_errors,
            idempotent_ticks,
            node_update_noop,
            queue_depth,
            hazard_total,
            coordinator_transitions,
        }
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
