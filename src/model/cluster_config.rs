use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Transport-layer protocol an IPVS virtual service listens on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Tcp
    }
}

/// IPVS scheduler identifier, e.g. `wrr`, `mh`.
pub type Scheduler = String;

/// Forwarding/persistence knobs carried alongside a `ServiceDef`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IpvsOptions {
    /// IPVS scheduler, e.g. "wrr" or "mh". Defaults to "wrr" when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<Scheduler>,

    /// Use direct routing (gateway) forwarding rather than NAT.
    #[serde(default)]
    pub direct_routing: bool,

    /// Persistence timeout in seconds; 0/absent disables persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_timeout_seconds: Option<u32>,

    /// Protocol the virtual service listens on.
    #[serde(default)]
    pub protocol: Protocol,

    /// Global weight override. When set, every destination for this
    /// service is pinned to this weight regardless of pod count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_override: Option<u32>,

    /// When true, a cordoned node still contributes its normal weight.
    #[serde(default)]
    pub ignore_cordon: bool,
}

/// Desired definition of a single `(VIP, port)` virtual service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDef {
    pub namespace: String,
    pub service: String,
    pub port_name: String,
    #[serde(default)]
    pub ipvs_options: IpvsOptions,
}

/// `port -> ServiceDef` map; port keys are canonicalized decimal strings.
pub type PortMap = BTreeMap<String, ServiceDef>;

/// The desired state delivered by the ConfigMap watch: two parallel
/// per-family VIP maps plus per-VIP MTU overrides.
///
/// Invariant: a VIP key appears in at most one of `config`/`config6`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClusterConfig {
    #[serde(default, rename = "Config")]
    pub config: BTreeMap<String, PortMap>,
    #[serde(default, rename = "Config6")]
    pub config6: BTreeMap<String, PortMap>,
    #[serde(default, rename = "MTUConfig")]
    pub mtu_config: BTreeMap<String, u32>,
    #[serde(default, rename = "MTUConfig6")]
    pub mtu_config6: BTreeMap<String, u32>,
}

impl ClusterConfig {
    /// VIP maps for a given address family. `true` selects v6.
    pub fn vips(&self, v6: bool) -> &BTreeMap<String, PortMap> {
        if v6 { &self.config6 } else { &self.config }
    }

    pub fn mtus(&self, v6: bool) -> &BTreeMap<String, u32> {
        if v6 { &self.mtu_config6 } else { &self.mtu_config }
    }

    /// True if no VIP is desired in either family.
    pub fn is_empty(&self) -> bool {
        self.config.is_empty() && self.config6.is_empty()
    }

    /// Validates the cross-family invariant: a VIP key must not appear
    /// in both `config` and `config6` simultaneously.
    pub fn validate(&self) -> Result<(), String> {
        for vip in self.config.keys() {
            if self.config6.contains_key(vip) {
                return Err(format!("VIP {vip} present in both v4 and v6 config"));
            }
        }
        Ok(())
    }
}
