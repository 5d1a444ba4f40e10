//! Reconciler Loop (spec.md §4.5): the cooperative ticker that is the
//! sole mutator of kernel networking state. Exactly one instance runs
//! per active role.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::errors::ReconcileError;
use crate::http::Readiness;
use crate::managers::{AddressManager, BgpAdapter, IpTablesManager, IpvsManager};
use crate::metrics::Metrics;
use crate::model::ObservedAddresses;
use crate::parity::should_force_reconcile;
use crate::store::ClusterStateStore;

pub const FAST_TICK: Duration = Duration::from_secs(2);
pub const FORCED_TICK: Duration = Duration::from_secs(30);
pub const QUEUE_DEPTH_TICK: Duration = Duration::from_secs(60);

/// Which managers the reconciler actually owns, per spec.md §2/§9:
/// "`NodeRole` drives which managers a running process constructs." The
/// core loop (ticks, parity check, forced reconcile) is shared; only the
/// manager set differs.
pub enum RoleManagers {
    /// BGP announcement + IPVS programming. No loopback/iptables work.
    Director { ipvs_v4: IpvsManager, ipvs_v6: IpvsManager, bgp: BgpAdapter },
    /// Loopback VIPs + iptables chain. No BGP/IPVS work.
    RealServer { address_v4: AddressManager, address_v6: AddressManager, iptables: IpTablesManager },
}

pub struct Reconciler {
    store: Arc<ClusterStateStore>,
    managers: RoleManagers,
    metrics: Arc<Metrics>,
    readiness: Arc<Readiness>,
}

impl Reconciler {
    pub fn new(
        store: Arc<ClusterStateStore>,
        managers: RoleManagers,
        metrics: Arc<Metrics>,
        readiness: Arc<Readiness>,
    ) -> Self {
        Reconciler { store, managers, metrics, readiness }
    }

    /// Runs the select loop until `shutdown` fires, then returns `Ok`.
    /// Per spec.md §5, the root cancel signal waits up to 5 seconds for
    /// this to acknowledge before running `cleanup()`. A `Fatal` error
    /// (spec.md §7 — kernel subsystem unreachable) aborts the loop early
    /// with `Err`, for the caller to turn into a nonzero process exit.
    ///
    /// `enabled` is the Role Coordinator's Start/Stop gate (spec.md
    /// §4.6): while `false`, ticks are skipped entirely rather than
    /// reconciling. The Director role has no coordinator of its own and
    /// passes a channel permanently held at `true`.
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
        mut enabled: watch::Receiver<bool>,
    ) -> Result<(), ReconcileError> {
        let mut fast = interval(FAST_TICK);
        let mut forced = interval(FORCED_TICK);
        let mut queue_depth = interval(QUEUE_DEPTH_TICK);

        loop {
            tokio::select! {
                _ = fast.tick() => {
                    if *enabled.borrow() {
                        self.on_fast_tick().await?;
                    }
                }
                _ = forced.tick() => {
                    if *enabled.borrow() {
                        self.on_forced_tick().await?;
                    }
                }
                _ = enabled.changed() => {}
                _ = queue_depth.tick() => {
                    // spec.md §4.5: queueDepth = pending configs in channel.
                    // This crate drives config delivery through the store
                    // rather than an unbounded channel, so the gauge
                    // reports 0/1 based on whether a delivery is pending.
                    let pending = if self.store.no_updates_ready() { 0 } else { 1 };
                    self.metrics.queue_depth.set(pending);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("reconciler received shutdown signal");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn on_fast_tick(&self) -> Result<(), ReconcileError> {
        if self.store.no_updates_ready() {
            return Ok(());
        }
        let new_config = should_force_reconcile(&self.store);
        if !new_config {
            let snapshot = self.store.snapshot();
            let any_drift = match self.check_parity(&snapshot).await {
                Ok(drift) => drift,
                Err(e) => {
                    return if self.record_error(&e) { Err(e) } else { Ok(()) };
                }
            };
            if !any_drift {
                self.metrics.idempotent_ticks.inc();
                return Ok(());
            }
        }

        // Fast-tick reconciles (whether drift- or new-config-triggered)
        // never pass `forced = true`: BGP withdrawals are deferred to
        // the 30s forced tick (spec.md §4.5, §9).
        self.reconcile(false, false).await?;
        self.reconcile(true, false).await?;
        Ok(())
    }

    async fn on_forced_tick(&self) -> Result<(), ReconcileError> {
        self.reconcile(false, true).await?;
        self.reconcile(true, true).await?;
        Ok(())
    }

    /// Runs the role-appropriate half of `sameConfig` for both address
    /// families, returning whether any drift was found.
    async fn check_parity(&self, snapshot: &crate::store::Snapshot) -> Result<bool, ReconcileError> {
        match &self.managers {
            RoleManagers::RealServer { address_v4, address_v6, .. } => {
                let observed_addrs = ObservedAddresses {
                    v4_devices: address_v4.observe().await?,
                    v6_devices: address_v6.observe().await?,
                };
                let mut any_drift = false;
                for v6 in [false, true] {
                    let address_mgr = if v6 { address_v6 } else { address_v4 };
                    if crate::parity::address_parity(&snapshot.config, &observed_addrs, address_mgr, v6).is_err() {
                        any_drift = true;
                    }
                }
                Ok(any_drift)
            }
            RoleManagers::Director { ipvs_v4, ipvs_v6, .. } => {
                let mut any_drift = false;
                for v6 in [false, true] {
                    let ipvs_mgr = if v6 { ipvs_v6 } else { ipvs_v4 };
                    let observed_ipvs = ipvs_mgr.observe().await?;
                    if crate::parity::ipvs_parity(
                        &snapshot.nodes,
                        &snapshot.config,
                        &snapshot.services,
                        &observed_ipvs,
                        ipvs_mgr,
                        v6,
                    )
                    .is_err()
                    {
                        any_drift = true;
                    }
                }
                Ok(any_drift)
            }
        }
    }

    /// One reconcile cycle for a single address family (spec.md §4.5):
    /// address changes precede IPVS changes precede BGP updates. Which
    /// half runs depends on the role this process was started with.
    ///
    /// `forced` distinguishes a 30s forced-tick reconcile from a 2s
    /// fast-tick one; only the Director half uses it (BGP withdrawal,
    /// spec.md §4.5/§9). Returns `Err` only for a `Fatal` error.
    pub async fn reconcile(&self, v6: bool, forced: bool) -> Result<(), ReconcileError> {
        let snapshot = self.store.snapshot();
        let result = match &self.managers {
            RoleManagers::RealServer { address_v4, address_v6, iptables } => {
                self.reconcile_realserver(&snapshot, v6, address_v4, address_v6, iptables).await
            }
            RoleManagers::Director { ipvs_v4, ipvs_v6, bgp } => {
                self.reconcile_director(&snapshot, v6, forced, ipvs_v4, ipvs_v6, bgp).await
            }
        };
        if let Err(e) = result {
            return if self.record_error(&e) { Err(e) } else { Ok(()) };
        }

        self.store.stamp_reconcile();
        self.metrics.reconciles_total.inc();
        self.readiness.mark_ready();
        Ok(())
    }

    async fn reconcile_realserver(
        &self,
        snapshot: &crate::store::Snapshot,
        v6: bool,
        address_v4: &AddressManager,
        address_v6: &AddressManager,
        iptables: &IpTablesManager,
    ) -> Result<(), ReconcileError> {
        let address_mgr = if v6 { address_v6 } else { address_v4 };
        let desired_vips: Vec<String> = snapshot.config.vips(v6).keys().cloned().collect();

        let observed = address_mgr.observe().await?;
        let diff = address_mgr.diff(&observed, &desired_vips);
        address_mgr.apply(&diff).await?;

        let mtus: &BTreeMap<String, u32> = snapshot.config.mtus(v6);
        address_mgr.set_mtu(mtus).await?;

        if !v6 {
            let iptables_desired = iptables.desired(&snapshot.config);
            let iptables_observed = iptables.observe().await?;
            iptables.apply(&iptables_desired, &iptables_observed).await?;
        }

        Ok(())
    }

    async fn reconcile_director(
        &self,
        snapshot: &crate::store::Snapshot,
        v6: bool,
        forced: bool,
        ipvs_v4: &IpvsManager,
        ipvs_v6: &IpvsManager,
        bgp: &BgpAdapter,
    ) -> Result<(), ReconcileError> {
        let ipvs_mgr = if v6 { ipvs_v6 } else { ipvs_v4 };
        let desired_vips: Vec<String> = snapshot.config.vips(v6).keys().cloned().collect();

        // IPVS binds destinations before BGP announces the VIP (spec.md
        // §5's ordering guarantees): a route must have somewhere to land
        // before it is advertised.
        let observed_ipvs = ipvs_mgr.observe().await?;
        let desired_ipvs = ipvs_mgr.desired(&snapshot.nodes, &snapshot.config, &snapshot.services);
        let managed_vips: std::collections::BTreeSet<String> = desired_vips.iter().cloned().collect();
        ipvs_mgr.apply(&desired_ipvs, &observed_ipvs, &managed_vips).await?;

        // BGP: additive-only on a fast tick (spec.md §4.5 rationale, §9)
        // — a VIP dropped from config stays announced as the union of
        // previously-announced and currently-desired until the 30s
        // forced tick, which passes the bare desired set and allows it
        // to shrink.
        let prev = match bgp.get().await {
            Ok(p) => p,
            Err(e) => {
                self.record_error(&e);
                Vec::new()
            }
        };
        let bgp_vips: Vec<String> = if forced {
            desired_vips
        } else {
            let mut union: std::collections::BTreeSet<String> = prev.iter().cloned().collect();
            union.extend(desired_vips);
            union.into_iter().collect()
        };
        if v6 {
            bgp.set_v6(&bgp_vips).await?;
        } else {
            bgp.set(&bgp_vips, &prev).await?;
        }

        Ok(())
    }

    /// Logs and counts `err`. Returns `true` for `Fatal`, telling the
    /// caller to stop ticking instead of letting the next tick retry.
    fn record_error(&self, err: &ReconcileError) -> bool {
        match err {
            ReconcileError::Transient(msg) => {
                warn!(error = %msg, "transient reconcile error, will retry next tick");
                self.metrics.reconcile_errors.with_label_values(&["transient"]).inc();
            }
            ReconcileError::ConfigInvalid(msg) => {
                warn!(error = %msg, "invalid config entry skipped");
                self.metrics.reconcile_errors.with_label_values(&["config_invalid"]).inc();
            }
            ReconcileError::Fatal(msg) => {
                error!(error = %msg, "fatal reconcile error, stopping reconciler");
                self.metrics.reconcile_errors.with_label_values(&["fatal"]).inc();
            }
        }
        err.is_fatal()
    }

    /// Best-effort removal of every managed VIP from loopback, scoped to
    /// the managed device-name prefix (spec.md §9 open question), never
    /// "all loopback addresses". Errors are aggregated and returned, not
    /// retried. A no-op for the Director role, which never holds VIPs on
    /// loopback.
    pub async fn cleanup(&self) -> Result<(), Vec<ReconcileError>> {
        let RoleManagers::RealServer { address_v4, address_v6, .. } = &self.managers else {
            return Ok(());
        };

        let mut errors = Vec::new();
        for address_mgr in [address_v4, address_v6] {
            let observed = match address_mgr.observe().await {
                Ok(o) => o,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            let diff = crate::managers::AddressDiff {
                to_remove: observed,
                to_add: Vec::new(),
            };
            if let Err(e) = address_mgr.apply(&diff).await {
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
