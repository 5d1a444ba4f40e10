//! The four mutating managers of spec.md §4.2-§4.7, plus the backend
//! traits that let them be exercised without root or a live cluster.

pub mod address;
pub mod backend;
pub mod bgp;
pub mod iptables;
pub mod ipvs;
pub mod netlink;
pub mod weight;

pub use address::{AddressDiff, AddressManager};
pub use backend::{AddressBackend, BgpBackend, IpTablesBackend, IpTablesRule, IpvsBackend};
pub use bgp::BgpAdapter;
pub use iptables::IpTablesManager;
pub use ipvs::IpvsManager;
