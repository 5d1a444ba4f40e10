//! Config Loader (spec.md §4.9): turns CLI flags + environment into a
//! single `RuntimeConfig` passed to both role entry points. One binary,
//! two long-running roles, each with its own flattened argument set.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};

use crate::watch::ConfigMapRef;

#[derive(Parser)]
#[command(name = "kube-lvs-ctl")]
#[command(about = "Kubernetes-aware L4 load-balancer control plane (BGP + IPVS)")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub role: Role,
}

#[derive(Subcommand)]
pub enum Role {
    /// Announces VIPs over BGP and programs IPVS; runs only while elected.
    Director(DirectorArgs),
    /// Hosts VIPs on loopback and forwards traffic; takes over on director loss.
    RealServer(RealServerArgs),
}

#[derive(Parser, Clone)]
pub struct DirectorArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// TCP ports on which the director listens as its liveness signal
    /// to real servers (spec.md §6). Repeatable.
    #[arg(long = "announce-port", required = true)]
    pub announce_ports: Vec<u16>,
}

#[derive(Parser, Clone)]
pub struct RealServerArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Director port this real server probes once per second.
    #[arg(long, default_value_t = 17_000)]
    pub probe_port: u16,

    /// Consecutive failed probes before taking over (spec.md §4.6).
    #[arg(long, default_value_t = 3)]
    pub max_tries: u32,

    /// iptables chain name programmed for locally-hosted VIPs.
    #[arg(long, default_value = "KUBE-LVS-REALSERVER")]
    pub iptables_chain: String,
}

#[derive(Parser, Clone)]
pub struct CommonArgs {
    /// Namespace/name of the ConfigMap carrying the cluster's VIP table.
    #[arg(long, default_value = "kube-system")]
    pub config_namespace: String,

    #[arg(long, default_value = "kube-lvs-ctl-config")]
    pub config_name: String,

    #[arg(long, default_value = "config.yaml")]
    pub config_data_key: String,

    /// Bind address for `/healthz`, `/readyz`, `/metrics`.
    #[arg(long, default_value = "0.0.0.0:9090")]
    pub metrics_addr: SocketAddr,

    /// BGP community tags attached to every announced VIP.
    #[arg(long = "bgp-community")]
    pub bgp_communities: Vec<String>,

    /// Seconds to wait for an in-flight reconcile to finish before
    /// running cleanup on shutdown (spec.md §5).
    #[arg(long, default_value_t = 5)]
    pub shutdown_grace_seconds: u64,
}

impl CommonArgs {
    pub fn config_map_ref(&self) -> ConfigMapRef {
        ConfigMapRef {
            namespace: self.config_namespace.clone(),
            name: self.config_name.clone(),
            data_key: self.config_data_key.clone(),
        }
    }
}
