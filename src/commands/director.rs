//! Director role entry point (spec.md §6): BGP announcement + IPVS
//! programming, gated only by this process actually being started as
//! `director` — no local hysteresis, a director is assumed primary for
//! as long as it runs. Spawns its background tasks, waits on Ctrl-C,
//! sends shutdown, joins.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use crate::config::DirectorArgs;
use crate::coordinator::run_director_listener;
use crate::http;
use crate::managers::netlink::{IpvsAdmBackend, LoopbackBgpSpeaker};
use crate::managers::{BgpAdapter, IpvsManager};
use crate::reconciler::{Reconciler, RoleManagers};

use super::{bootstrap, run_graceful_cleanup, spawn_watch_tasks, wait_for_shutdown_signal};

pub async fn run(args: DirectorArgs) -> Result<()> {
    let rt = bootstrap().await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = spawn_watch_tasks(&rt, &args.common, &shutdown_rx);

    let ipvs_v4 = IpvsManager::new(Arc::new(IpvsAdmBackend), false);
    let ipvs_v6 = IpvsManager::new(Arc::new(IpvsAdmBackend), true);
    let bgp = BgpAdapter::new(Arc::new(LoopbackBgpSpeaker::default()), args.common.bgp_communities.clone());

    let reconciler = Arc::new(Reconciler::new(
        rt.store.clone(),
        RoleManagers::Director { ipvs_v4, ipvs_v6, bgp },
        rt.metrics.clone(),
        rt.readiness.clone(),
    ));

    let announce_ports = args.announce_ports.clone();
    let listener_shutdown = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = run_director_listener(announce_ports, listener_shutdown).await {
            tracing::warn!(error = %e, "director liveness listener exited");
        }
    }));

    let metrics = rt.metrics.clone();
    let readiness = rt.readiness.clone();
    let addr = args.common.metrics_addr;
    let http_shutdown = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = http::serve(addr, metrics, readiness, http_shutdown).await {
            tracing::warn!(error = %e, "observability HTTP server exited");
        }
    }));

    let (_always_enabled_tx, always_enabled_rx) = watch::channel(true);
    let mut recon_task = {
        let reconciler = reconciler.clone();
        let sd = shutdown_rx.clone();
        tokio::spawn(async move { reconciler.run(sd, always_enabled_rx).await })
    };

    info!(ports = ?args.announce_ports, "director role started");
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
        tracing::warn!(error = %e, "director exiting due to fatal reconcile error");
        return Err(e.into());
    }
    Ok(())
}
