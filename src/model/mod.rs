//! Core data model shared by both the Director and Real Server roles.
//!
//! Everything here is inert data plus pure helper functions — no I/O, no
//! kernel calls. Managers and the reconciler transform these types;
//! backends (in `crate::managers::backend`) are the only things that
//! touch the outside world.

pub mod cluster_config;
pub mod nodes;
pub mod observed;
pub mod services;

pub use cluster_config::{ClusterConfig, IpvsOptions, PortMap, Protocol, ServiceDef};
pub use nodes::{nodes_equal, EndpointRef, Node, NodesList};
pub use observed::{
    device_name_for_vip, vip_for_device_name, Destination, ObservedAddresses, ObservedIpvs,
    ServiceKey, VirtualService, MANAGED_DEVICE_PREFIX,
};
pub use services::ServicesIndex;
