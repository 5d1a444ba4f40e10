use std::collections::{BTreeSet, HashMap};

use super::cluster_config::Protocol;

/// Device-name prefix used for every VIP this process places on loopback.
/// Cleanup (spec.md §5, §9 open question) is scoped to this prefix rather
/// than to "all loopback addresses".
pub const MANAGED_DEVICE_PREFIX: &str = "kube-lvs";

/// Deterministic, injective VIP -> loopback device name mapping.
/// Returns `None` if the VIP cannot be parsed (dropped from desired
/// per spec.md §4.2's "empty device names are silently dropped" rule).
pub fn device_name_for_vip(vip: &str, v6: bool) -> Option<String> {
    if vip.trim().is_empty() {
        return None;
    }
    let family = if v6 { "6" } else { "4" };
    let hex: String = vip.bytes().map(|b| format!("{b:02x}")).collect();
    Some(format!("{MANAGED_DEVICE_PREFIX}{family}-{hex}"))
}

/// Recovers the VIP encoded in a managed device name, or `None` if the
/// name is not one of ours (defensive against devices placed by another
/// process).
pub fn vip_for_device_name(device: &str) -> Option<String> {
    let rest = device.strip_prefix(MANAGED_DEVICE_PREFIX)?;
    let rest = rest.strip_prefix('4').or_else(|| rest.strip_prefix('6'))?;
    let hex = rest.strip_prefix('-')?;
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }
    let chars: Vec<char> = hex.chars().collect();
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for pair in chars.chunks(2) {
        let s: String = pair.iter().collect();
        bytes.push(u8::from_str_radix(&s, 16).ok()?);
    }
    String::from_utf8(bytes).ok()
}

/// Ordered device-name sequences observed on loopback, one per family.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedAddresses {
    pub v4_devices: Vec<String>,
    pub v6_devices: Vec<String>,
}

impl ObservedAddresses {
    pub fn devices(&self, v6: bool) -> &[String] {
        if v6 { &self.v6_devices } else { &self.v4_devices }
    }
}

/// One weighted backend for an IPVS virtual service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination {
    pub real_ip: String,
    pub real_port: u16,
    pub weight: u32,
    pub direct_routing: bool,
}

/// Key identifying an IPVS virtual service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub vip: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl PartialOrd for Protocol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Protocol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

/// One virtual service and its current destination set, plus the
/// scheduler/flags used to detect drift beyond membership.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualService {
    pub key: ServiceKey,
    pub scheduler: String,
    pub persistence_timeout_seconds: Option<u32>,
    pub destinations: BTreeSet<Destination>,
}

/// The full observed IPVS state: every virtual service keyed by
/// `(VIP, port, protocol)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedIpvs {
    pub services: HashMap<ServiceKey, VirtualService>,
}

impl ObservedIpvs {
    pub fn get(&self, key: &ServiceKey) -> Option<&VirtualService> {
        self.services.get(key)
    }
}
