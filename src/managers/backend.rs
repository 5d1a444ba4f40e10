//! Backend traits: the seam between the reconciliation engine and the
//! kernel/BGP speaker. Production implementations do real netlink/IPVS/
//! iptables/gRPC calls; tests use in-memory fakes so the property and
//! scenario tests in spec.md §8 run without root or a live cluster.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::errors::{AddressError, BgpError, IpTablesError, IpvsError};
use crate::model::{ObservedIpvs, ServiceKey, VirtualService};

/// The loopback (and primary-interface MTU) surface for one address
/// family (spec.md §4.2).
#[async_trait]
pub trait AddressBackend: Send + Sync {
    /// Ordered device names currently on loopback for this family.
    async fn observe(&self) -> Result<Vec<String>, AddressError>;

    /// Adds `vip` to loopback under its managed device name.
    async fn add(&self, vip: &str) -> Result<(), AddressError>;

    /// Removes a managed device by name.
    async fn remove(&self, device: &str) -> Result<(), AddressError>;

    /// Applies only the MTU changes present in `desired`.
    async fn set_mtu(&self, desired: &BTreeMap<String, u32>) -> Result<(), AddressError>;
}

/// The IPVS virtual-service/destination surface (spec.md §4.3).
#[async_trait]
pub trait IpvsBackend: Send + Sync {
    async fn observe(&self) -> Result<ObservedIpvs, IpvsError>;

    async fn add_service(&self, svc: &VirtualService) -> Result<(), IpvsError>;
    async fn remove_service(&self, key: &ServiceKey) -> Result<(), IpvsError>;

    async fn add_destination(
        &self,
        key: &ServiceKey,
        dest: &crate::model::Destination,
    ) -> Result<(), IpvsError>;
    async fn remove_destination(
        &self,
        key: &ServiceKey,
        dest: &crate::model::Destination,
    ) -> Result<(), IpvsError>;
    async fn update_destination(
        &self,
        key: &ServiceKey,
        dest: &crate::model::Destination,
    ) -> Result<(), IpvsError>;
}

/// One rule in the managed iptables chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IpTablesRule {
    pub vip: String,
    pub port: u16,
    pub protocol: crate::model::Protocol,
}

/// The managed NAT/masquerade chain surface (spec.md §4.3b).
#[async_trait]
pub trait IpTablesBackend: Send + Sync {
    fn chain_name(&self) -> &str;
    async fn observe(&self) -> Result<Vec<IpTablesRule>, IpTablesError>;
    async fn add_rule(&self, rule: &IpTablesRule) -> Result<(), IpTablesError>;
    async fn remove_rule(&self, rule: &IpTablesRule) -> Result<(), IpTablesError>;
}

/// The external BGP speaker façade (spec.md §4.7). Idempotent: calling
/// `set`/`set_v6` twice with the same arguments must be observably
/// equivalent to calling it once.
#[async_trait]
pub trait BgpBackend: Send + Sync {
    async fn get(&self) -> Result<Vec<String>, BgpError>;
    async fn set(
        &self,
        v4_addresses: &[String],
        previously_announced: &[String],
        communities: &[String],
    ) -> Result<(), BgpError>;
    async fn set_v6(&self, v6_addresses: &[String], communities: &[String]) -> Result<(), BgpError>;
}
