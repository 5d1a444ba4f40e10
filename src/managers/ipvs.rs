//! IPVS Manager (spec.md §4.3): derives the desired virtual-service set
//! from `(nodes, config, services)` and reconciles it against the
//! observed kernel state with the minimal add/remove/update action set.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::ReconcileError;
use crate::model::{
    ClusterConfig, Destination, Node, NodesList, ObservedIpvs, PortMap, ServiceDef, ServiceKey,
    ServicesIndex, VirtualService,
};

use super::backend::IpvsBackend;
use super::weight::destination_weight;

pub struct IpvsManager {
    backend: Arc<dyn IpvsBackend>,
    v6: bool,
}

impl IpvsManager {
    pub fn new(backend: Arc<dyn IpvsBackend>, v6: bool) -> Self {
        IpvsManager { backend, v6 }
    }

    pub async fn observe(&self) -> Result<ObservedIpvs, ReconcileError> {
        Ok(self.backend.observe().await?)
    }

    /// Desired-state derivation (spec.md §4.3 rules 1-3). `ConfigInvalid`
    /// entries (unresolved service) are skipped and logged, not fatal.
    pub fn desired(&self, nodes: &NodesList, config: &ClusterConfig, services: &ServicesIndex) -> ObservedIpvs {
        let mut out = ObservedIpvs::default();
        for (vip, ports) in config.vips(self.v6) {
            self.desired_for_vip(vip, ports, nodes, services, &mut out);
        }
        out
    }

    fn desired_for_vip(
        &self,
        vip: &str,
        ports: &PortMap,
        nodes: &NodesList,
        services: &ServicesIndex,
        out: &mut ObservedIpvs,
    ) {
        for (port_str, svc_def) in ports {
            let Ok(port) = port_str.parse::<u16>() else {
                warn!(vip = %vip, port = %port_str, "malformed port, skipping");
                continue;
            };

            let key = ServiceKey {
                vip: vip.to_string(),
                port,
                protocol: svc_def.ipvs_options.protocol,
            };

            let destinations = self.destinations_for(svc_def, nodes, services, vip, port);

            // Rule 3: omit services with zero destinations from nothing —
            // the virtual service is still emitted so announcements
            // remain consistent; an empty destination set is legitimate.
            out.services.insert(
                key.clone(),
                VirtualService {
                    key,
                    scheduler: svc_def
                        .ipvs_options
                        .scheduler
                        .clone()
                        .unwrap_or_else(|| "wrr".to_string()),
                    persistence_timeout_seconds: svc_def.ipvs_options.persistence_timeout_seconds,
                    destinations,
                },
            );
        }
    }

    fn destinations_for(
        &self,
        svc_def: &ServiceDef,
        nodes: &NodesList,
        services: &ServicesIndex,
        vip: &str,
        port: u16,
    ) -> BTreeSet<Destination> {
        let Some((_cluster_ip, backend_port)) =
            services.resolve(&svc_def.namespace, &svc_def.service, &svc_def.port_name)
        else {
            warn!(
                vip = %vip,
                port = %port,
                namespace = %svc_def.namespace,
                service = %svc_def.service,
                port_name = %svc_def.port_name,
                "service port did not resolve, skipping destinations for this service"
            );
            return BTreeSet::new();
        };

        nodes
            .nodes_for_service(&svc_def.namespace, &svc_def.service)
            .filter_map(|n: &Node| {
                n.primary_address().map(|addr| Destination {
                    real_ip: addr.to_string(),
                    real_port: backend_port,
                    weight: destination_weight(n, svc_def),
                    direct_routing: svc_def.ipvs_options.direct_routing,
                })
            })
            // Rule 2: sort per service by (address, port) for determinism
            // — a BTreeSet ordered by Destination's derived Ord already
            // provides this.
            .collect()
    }

    /// Apply rules (spec.md §4.3): add/remove virtual services, then
    /// reconcile destinations for every kept service.
    pub async fn apply(
        &self,
        desired: &ObservedIpvs,
        observed: &ObservedIpvs,
        managed_vips: &BTreeSet<String>,
    ) -> Result<(), ReconcileError> {
        for (key, svc) in &desired.services {
            if !observed.services.contains_key(key) {
                info!(vip = %key.vip, port = key.port, "adding virtual service");
                self.backend.add_service(svc).await?;
                for dest in &svc.destinations {
                    self.backend.add_destination(key, dest).await?;
                }
            }
        }

        for (key, _) in &observed.services {
            if desired.services.contains_key(key) {
                continue;
            }
            // Only remove if the VIP is no longer managed at all —
            // otherwise this is drift on a still-managed service,
            // converged via destination edits below.
            if !managed_vips.contains(&key.vip) {
                info!(vip = %key.vip, port = key.port, "removing virtual service no longer in config");
                self.backend.remove_service(key).await?;
            }
        }

        for (key, desired_svc) in &desired.services {
            let Some(observed_svc) = observed.services.get(key) else {
                continue;
            };

            let desired_set: &BTreeSet<Destination> = &desired_svc.destinations;
            let observed_set: &BTreeSet<Destination> = &observed_svc.destinations;

            for dest in desired_set.difference(observed_set) {
                if let Some(existing) = observed_set
                    .iter()
                    .find(|d| d.real_ip == dest.real_ip && d.real_port == dest.real_port)
                {
                    if existing.weight != dest.weight || existing.direct_routing != dest.direct_routing {
                        info!(vip = %key.vip, port = key.port, real = %dest.real_ip, "updating destination");
                        self.backend.update_destination(key, dest).await?;
                    }
                } else {
                    info!(vip = %key.vip, port = key.port, real = %dest.real_ip, "adding destination");
                    self.backend.add_destination(key, dest).await?;
                }
            }

            for dest in observed_set.difference(desired_set) {
                if !desired_set
                    .iter()
                    .any(|d| d.real_ip == dest.real_ip && d.real_port == dest.real_port)
                {
                    info!(vip = %key.vip, port = key.port, real = %dest.real_ip, "removing stale destination");
                    self.backend.remove_destination(key, dest).await?;
                }
            }
        }

        Ok(())
    }
}
