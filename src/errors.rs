//! Error kinds per spec.md §7.
//!
//! `Transient` and `ConfigInvalid` are recorded and swallowed by the
//! reconciler (the next tick retries); `Fatal` propagates out of the
//! reconciler task and causes the process to exit nonzero. Backend
//! implementations (address/IPVS/iptables/BGP) return their own narrow
//! error type and convert into `ReconcileError` at the manager boundary.

use thiserror::Error;

/// Binary missing or permission denied mean the kernel subsystem itself
/// is unreachable, not that this one call can be retried (spec.md §7).
fn io_is_fatal(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied)
}

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("kernel rejected address operation on {device}: {source}")]
    Kernel {
        device: String,
        #[source]
        source: std::io::Error,
    },
    #[error("VIP {0} cannot be represented as a loopback device name")]
    Unrepresentable(String),
}

#[derive(Debug, Error)]
pub enum IpvsError {
    #[error("IPVS operation on {vip}:{port} failed: {source}")]
    Kernel {
        vip: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("service {namespace}/{service} port {port_name} did not resolve to a backend port")]
    UnresolvedService {
        namespace: String,
        service: String,
        port_name: String,
    },
}

#[derive(Debug, Error)]
pub enum IpTablesError {
    #[error("iptables operation on chain {chain} failed: {source}")]
    Kernel {
        chain: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum BgpError {
    #[error("BGP speaker call failed: {0}")]
    Speaker(String),
}

/// Classification a caller needs to decide retry vs. abort vs. exit.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// May succeed on retry (e.g. EBUSY on an IPVS call). The reconciler
    /// logs at error level, bumps a metric, and lets the next tick retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// The desired state for one entry could not be materialized (an
    /// unresolved service, a malformed VIP). That entry is skipped; the
    /// rest of the reconcile continues.
    #[error("invalid config entry: {0}")]
    ConfigInvalid(String),

    /// The kernel subsystem itself is unreachable (e.g. missing netlink
    /// privilege). Propagates out of the reconciler task and exits the
    /// process nonzero.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ReconcileError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconcileError::Fatal(_))
    }
}

impl From<AddressError> for ReconcileError {
    fn from(e: AddressError) -> Self {
        match &e {
            AddressError::Unrepresentable(vip) => {
                ReconcileError::ConfigInvalid(format!("VIP {vip} unrepresentable"))
            }
            AddressError::Kernel { source, .. } if io_is_fatal(source) => ReconcileError::Fatal(e.to_string()),
            AddressError::Kernel { .. } => ReconcileError::Transient(e.to_string()),
        }
    }
}

impl From<IpvsError> for ReconcileError {
    fn from(e: IpvsError) -> Self {
        match &e {
            IpvsError::UnresolvedService { .. } => ReconcileError::ConfigInvalid(e.to_string()),
            IpvsError::Kernel { source, .. } if io_is_fatal(source) => ReconcileError::Fatal(e.to_string()),
            IpvsError::Kernel { .. } => ReconcileError::Transient(e.to_string()),
        }
    }
}

impl From<IpTablesError> for ReconcileError {
    fn from(e: IpTablesError) -> Self {
        match &e {
            IpTablesError::Kernel { source, .. } if io_is_fatal(source) => ReconcileError::Fatal(e.to_string()),
            IpTablesError::Kernel { .. } => ReconcileError::Transient(e.to_string()),
        }
    }
}

impl From<BgpError> for ReconcileError {
    fn from(e: BgpError) -> Self {
        ReconcileError::Transient(e.to_string())
    }
}
