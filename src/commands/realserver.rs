//! Real Server role entry point (spec.md §6): loopback VIPs + iptables,
//! gated Start/Stop by the Role Coordinator's TCP prober + hysteresis
//! (spec.md §4.6, scenario S5). While the director is reachable the
//! worker is disabled and touches nothing; on `max_tries` consecutive
//! failed probes it starts programming loopback and iptables, and
//! yields (with cleanup) on the director's first subsequent success.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::RealServerArgs;
use crate::coordinator::run_realserver_prober;
use crate::http;
use crate::managers::netlink::{IpRouteAddressBackend, IpTablesCommandBackend};
use crate::managers::{AddressManager, IpTablesManager};
use crate::reconciler::{Reconciler, RoleManagers};

use super::{bootstrap, run_graceful_cleanup, spawn_watch_tasks, wait_for_shutdown_signal};

pub async fn run(args: RealServerArgs) -> Result<()> {
    let rt = bootstrap().await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = spawn_watch_tasks(&rt, &args.common, &shutdown_rx);

    let address_v4 = AddressManager::new(Arc::new(IpRouteAddressBackend::new(false)), false);
    let address_v6 = AddressManager::new(Arc::new(IpRouteAddressBackend::new(true)), true);
    let iptables = IpTablesManager::new(Arc::new(IpTablesCommandBackend::new(args.iptables_chain.clone())));

    let reconciler = Arc::new(Reconciler::new(
        rt.store.clone(),
        RoleManagers::RealServer { address_v4, address_v6, iptables },
        rt.metrics.clone(),
        rt.readiness.clone(),
    ));

    let (worker_enabled_tx, worker_enabled_rx) = watch::channel(false);

    let prober_shutdown = shutdown_rx.clone();
    let metrics = rt.metrics.clone();
    let probe_port = args.probe_port;
    let max_tries = args.max_tries;
    handles.push(tokio::spawn(async move {
        run_realserver_prober(probe_port, max_tries, worker_enabled_tx, metrics, prober_shutdown).await;
    }));

    let cleanup_on_yield = {
        let reconciler = reconciler.clone();
        let mut worker_enabled_rx = worker_enabled_rx.clone();
        let mut sd = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = worker_enabled_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if !*worker_enabled_rx.borrow() {
                            info!("director regained liveness, cleaning up real-server state");
                            if let Err(errs) = reconciler.cleanup().await {
                                warn!(count = errs.len(), "cleanup after yield finished with errors");
                            }
                        }
                    }
                    changed = sd.changed() => {
                        if changed.is_err() || *sd.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    };
    handles.push(cleanup_on_yield);

    let metrics = rt.metrics.clone();
    let readiness = rt.readiness.clone();
    let addr = args.common.metrics_addr;
    let http_shutdown = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = http::serve(addr, metrics, readiness, http_shutdown).await {
            warn!(error = %e, "observability HTTP server exited");
        }
    }));

    let mut recon_task = {
        let reconciler = reconciler.clone();
        let sd = shutdown_rx.clone();
        let enabled = worker_enabled_rx.clone();
        tokio::spawn(async move { reconciler.run(sd, enabled).await })
    };

    info!(probe_port, max_tries, "real-server role started");
    let fatal = tokio::select! {
        _ = wait_for_shutdown_signal(shutdown_tx) => {
            let _ = recon_task.await;
            None
        }
        result = &mut recon_task => result.ok().and_then(|r| r.err()),
    };

    run_graceful_cleanup(args.common.shutdown_grace_seconds, reconciler.cleanup()).await;
    for handle in handles {
        handle.abort();
    }

    if let Some(e) = fatal {
        warn!(error = %e, "real-server exiting due to fatal reconcile error");
        return Err(e.into());
    }
    Ok(())
}
