pub mod director;
pub mod realserver;

use std::sync::Arc;

use anyhow::{Context, Result};
use kube::Client;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use crate::config::CommonArgs;
use crate::http::Readiness;
use crate::metrics::Metrics;
use crate::store::ClusterStateStore;

/// Shared plumbing both role entry points wire up before constructing
/// their role-specific managers: the Kubernetes client, state store,
/// metrics registry, and the three watch tasks (spec.md §6).
pub(crate) struct SharedRuntime {
    pub client: Client,
    pub store: Arc<ClusterStateStore>,
    pub metrics: Arc<Metrics>,
    pub readiness: Arc<Readiness>,
}

pub(crate) async fn bootstrap() -> Result<SharedRuntime> {
    let client = Client::try_default()
        .await
        .context("failed to build Kubernetes client from in-cluster or kubeconfig context")?;
    Ok(SharedRuntime {
        client,
        store: Arc::new(ClusterStateStore::new()),
        metrics: Arc::new(Metrics::new()),
        readiness: Arc::new(Readiness::default()),
    })
}

pub(crate) fn spawn_watch_tasks(
    rt: &SharedRuntime,
    common: &CommonArgs,
    shutdown: &watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    let client = rt.client.clone();
    let store = rt.store.clone();
    let node_noop = rt.metrics.node_update_noop.clone();
    let sd = shutdown.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = crate::watch::run_nodes_endpoints_watch(client, store, node_noop, sd).await {
            warn!(error = %e, "nodes+endpoints watch exited");
        }
    }));

    let client = rt.client.clone();
    let store = rt.store.clone();
    let cfg_ref = common.config_map_ref();
    let sd = shutdown.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = crate::watch::run_config_watch(client, cfg_ref, store, sd).await {
            warn!(error = %e, "config watch exited");
        }
    }));

    let client = rt.client.clone();
    let store = rt.store.clone();
    let sd = shutdown.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = crate::watch::run_services_watch(client, store, sd).await {
            warn!(error = %e, "services watch exited");
        }
    }));

    handles
}

/// Waits for Ctrl-C, then flips `shutdown_tx`. Shared by both roles.
pub(crate) async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}

/// Runs `cleanup` with the grace period from spec.md §5: up to
/// `grace_seconds` to finish, best-effort beyond that.
pub(crate) async fn run_graceful_cleanup<F>(grace_seconds: u64, cleanup: F)
where
    F: std::future::Future<Output = Result<(), Vec<crate::errors::ReconcileError>>>,
{
    match timeout(Duration::from_secs(grace_seconds), cleanup).await {
        Ok(Ok(())) => info!("cleanup completed"),
        Ok(Err(errs)) => warn!(count = errs.len(), "cleanup finished with errors"),
        Err(_) => warn!("cleanup did not finish within the shutdown grace period"),
    }
}
