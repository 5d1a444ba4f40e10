mod common;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kube_lvs_ctl::errors::{AddressError, BgpError, IpTablesError, IpvsError};
use kube_lvs_ctl::http::Readiness;
use kube_lvs_ctl::managers::{
    AddressBackend, AddressManager, BgpAdapter, BgpBackend, IpTablesBackend, IpTablesManager,
    IpTablesRule, IpvsBackend, IpvsManager,
};
use kube_lvs_ctl::metrics::Metrics;
use kube_lvs_ctl::model::{
    device_name_for_vip, ClusterConfig, Destination, ObservedIpvs, Protocol, ServiceKey, VirtualService,
};
use kube_lvs_ctl::reconciler::{Reconciler, RoleManagers};
use kube_lvs_ctl::store::ClusterStateStore;
use tokio::sync::watch;

use common::{config_with_vip, services_index, two_node_list};

#[derive(Default)]
struct FakeAddressBackend {
    devices: Mutex<BTreeSet<String>>,
}

#[async_trait]
impl AddressBackend for FakeAddressBackend {
    async fn observe(&self) -> Result<Vec<String>, AddressError> {
        Ok(self.devices.lock().unwrap().iter().cloned().collect())
    }
    async fn add(&self, vip: &str) -> Result<(), AddressError> {
        let device = device_name_for_vip(vip, false).ok_or_else(|| AddressError::Unrepresentable(vip.to_string()))?;
        self.devices.lock().unwrap().insert(device);
        Ok(())
    }
    async fn remove(&self, device: &str) -> Result<(), AddressError> {
        self.devices.lock().unwrap().remove(device);
        Ok(())
    }
    async fn set_mtu(&self, _desired: &BTreeMap<String, u32>) -> Result<(), AddressError> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeIpvsBackend {
    services: Mutex<HashMap<ServiceKey, VirtualService>>,
}

#[async_trait]
impl IpvsBackend for FakeIpvsBackend {
    async fn observe(&self) -> Result<ObservedIpvs, IpvsError> {
        Ok(ObservedIpvs { services: self.services.lock().unwrap().clone() })
    }
    async fn add_service(&self, svc: &VirtualService) -> Result<(), IpvsError> {
        let mut s = svc.clone();
        s.destinations = BTreeSet::new();
        self.services.lock().unwrap().insert(svc.key.clone(), s);
        Ok(())
    }
    async fn remove_service(&self, key: &ServiceKey) -> Result<(), IpvsError> {
        self.services.lock().unwrap().remove(key);
        Ok(())
    }
    async fn add_destination(&self, key: &ServiceKey, dest: &Destination) -> Result<(), IpvsError> {
        if let Some(svc) = self.services.lock().unwrap().get_mut(key) {
            svc.destinations.insert(dest.clone());
        }
        Ok(())
    }
    async fn remove_destination(&self, key: &ServiceKey, dest: &Destination) -> Result<(), IpvsError> {
        if let Some(svc) = self.services.lock().unwrap().get_mut(key) {
            svc.destinations.remove(dest);
        }
        Ok(())
    }
    async fn update_destination(&self, key: &ServiceKey, dest: &Destination) -> Result<(), IpvsError> {
        if let Some(svc) = self.services.lock().unwrap().get_mut(key) {
            svc.destinations.remove(dest);
            svc.destinations.insert(dest.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeIpTablesBackend {
    rules: Mutex<BTreeSet<IpTablesRule>>,
}

#[async_trait]
impl IpTablesBackend for FakeIpTablesBackend {
    fn chain_name(&self) -> &str {
        "KUBE-LVS-REALSERVER"
    }
    async fn observe(&self) -> Result<Vec<IpTablesRule>, IpTablesError> {
        Ok(self.rules.lock().unwrap().iter().cloned().collect())
    }
    async fn add_rule(&self, rule: &IpTablesRule) -> Result<(), IpTablesError> {
        self.rules.lock().unwrap().insert(rule.clone());
        Ok(())
    }
    async fn remove_rule(&self, rule: &IpTablesRule) -> Result<(), IpTablesError> {
        self.rules.lock().unwrap().remove(rule);
        Ok(())
    }
}

#[derive(Default)]
struct FakeBgpBackend {
    announced: Mutex<Vec<String>>,
}

#[async_trait]
impl BgpBackend for FakeBgpBackend {
    async fn get(&self) -> Result<Vec<String>, BgpError> {
        Ok(self.announced.lock().unwrap().clone())
    }
    async fn set(&self, v4: &[String], _prev: &[String], _communities: &[String]) -> Result<(), BgpError> {
        *self.announced.lock().unwrap() = v4.to_vec();
        Ok(())
    }
    async fn set_v6(&self, _v6: &[String], _communities: &[String]) -> Result<(), BgpError> {
        Ok(())
    }
}

fn director_reconciler(store: Arc<ClusterStateStore>) -> (Reconciler, Arc<FakeBgpBackend>, Arc<FakeIpvsBackend>) {
    let bgp_backend = Arc::new(FakeBgpBackend::default());
    let ipvs_backend = Arc::new(FakeIpvsBackend::default());
    let ipvs_v4 = IpvsManager::new(ipvs_backend.clone(), false);
    let ipvs_v6 = IpvsManager::new(Arc::new(FakeIpvsBackend::default()), true);
    let bgp = BgpAdapter::new(bgp_backend.clone(), vec!["65000:100".to_string()]);
    let reconciler = Reconciler::new(
        store,
        RoleManagers::Director { ipvs_v4, ipvs_v6, bgp },
        Arc::new(Metrics::new()),
        Arc::new(Readiness::default()),
    );
    (reconciler, bgp_backend, ipvs_backend)
}

fn realserver_reconciler(store: Arc<ClusterStateStore>) -> (Reconciler, Arc<FakeAddressBackend>) {
    let address_backend = Arc::new(FakeAddressBackend::default());
    let address_v4 = AddressManager::new(address_backend.clone(), false);
    let address_v6 = AddressManager::new(Arc::new(FakeAddressBackend::default()), true);
    let iptables = IpTablesManager::new(Arc::new(FakeIpTablesBackend::default()));
    let reconciler = Reconciler::new(
        store,
        RoleManagers::RealServer { address_v4, address_v6, iptables },
        Arc::new(Metrics::new()),
        Arc::new(Readiness::default()),
    );
    (reconciler, address_backend)
}

fn store_with_vip() -> Arc<ClusterStateStore> {
    let store = Arc::new(ClusterStateStore::new());
    store.apply_config(config_with_vip("10.0.0.1", "80"));
    store
}

// S1: a director's first reconcile announces the VIP over BGP.
#[tokio::test]
async fn director_reconcile_announces_vip() {
    let (reconciler, bgp_backend, _ipvs) = director_reconciler(store_with_vip());
    reconciler.reconcile(false, false).await.unwrap();
    assert_eq!(bgp_backend.announced.lock().unwrap().as_slice(), &["10.0.0.1".to_string()]);
}

// S3: a VIP dropped from config must not be withdrawn from BGP on the
// next fast tick, only on the 30s forced tick.
#[tokio::test]
async fn director_bgp_withdrawal_is_deferred_to_forced_reconcile() {
    let store = store_with_vip();
    let (reconciler, bgp_backend, _ipvs) = director_reconciler(store.clone());

    reconciler.reconcile(false, false).await.unwrap();
    assert_eq!(bgp_backend.announced.lock().unwrap().as_slice(), &["10.0.0.1".to_string()]);

    store.apply_config(ClusterConfig::default());

    // Fast-tick style reconcile: the VIP stays announced (additive union).
    reconciler.reconcile(false, false).await.unwrap();
    assert_eq!(bgp_backend.announced.lock().unwrap().as_slice(), &["10.0.0.1".to_string()]);

    // Forced reconcile: the dropped VIP is finally withdrawn.
    reconciler.reconcile(false, true).await.unwrap();
    assert!(bgp_backend.announced.lock().unwrap().is_empty());
}

// Director role's IPVS half programs real destinations derived from
// nodes + services, not just BGP announcement.
#[tokio::test]
async fn director_reconcile_programs_ipvs_destinations_from_nodes_and_services() {
    let store = store_with_vip();
    store.apply_nodes(two_node_list());
    store.apply_services(services_index());
    let (reconciler, _bgp, ipvs_backend) = director_reconciler(store);

    reconciler.reconcile(false, false).await.unwrap();

    let services = ipvs_backend.services.lock().unwrap();
    let key = ServiceKey { vip: "10.0.0.1".to_string(), port: 80, protocol: Protocol::Tcp };
    let svc = services.get(&key).expect("virtual service should be programmed");
    assert_eq!(svc.destinations.len(), 2);
}

// Readiness only flips after a reconcile actually succeeds.
#[tokio::test]
async fn reconcile_marks_process_ready() {
    let store = store_with_vip();
    let address_backend = Arc::new(FakeAddressBackend::default());
    let address_v4 = AddressManager::new(address_backend, false);
    let address_v6 = AddressManager::new(Arc::new(FakeAddressBackend::default()), true);
    let iptables = IpTablesManager::new(Arc::new(FakeIpTablesBackend::default()));
    let readiness = Arc::new(Readiness::default());
    let reconciler = Reconciler::new(
        store,
        RoleManagers::RealServer { address_v4, address_v6, iptables },
        Arc::new(Metrics::new()),
        readiness.clone(),
    );
    assert!(!readiness.is_ready());
    reconciler.reconcile(false, false).await.unwrap();
    assert!(readiness.is_ready());
}

// Director role never touches loopback: cleanup() is a no-op for it.
#[tokio::test]
async fn director_cleanup_is_a_noop() {
    let (reconciler, _bgp, _ipvs) = director_reconciler(store_with_vip());
    assert!(reconciler.cleanup().await.is_ok());
}

// S3 (real-server half): once a VIP has been placed on loopback,
// `cleanup()` withdraws it regardless of what the config currently says
// — this is the shutdown/yield path, not a config-driven reconcile.
#[tokio::test]
async fn realserver_reconcile_then_cleanup_removes_vip() {
    let (reconciler, address_backend) = realserver_reconciler(store_with_vip());
    reconciler.reconcile(false, false).await.unwrap();
    assert_eq!(address_backend.devices.lock().unwrap().len(), 1);

    reconciler.cleanup().await.unwrap();
    assert!(address_backend.devices.lock().unwrap().is_empty());
}

#[tokio::test]
async fn realserver_cleanup_is_scoped_to_both_families() {
    let (reconciler, _addr) = realserver_reconciler(store_with_vip());
    reconciler.reconcile(false, false).await.unwrap();
    reconciler.reconcile(true, false).await.unwrap();
    assert!(reconciler.cleanup().await.is_ok());
}

// The `run()` select loop must react to a shutdown signal promptly
// rather than waiting out the fast-tick interval.
#[tokio::test]
async fn reconciler_run_exits_promptly_on_shutdown() {
    let (reconciler, _addr) = realserver_reconciler(Arc::new(ClusterStateStore::new()));
    let reconciler = Arc::new(reconciler);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (_enabled_tx, enabled_rx) = watch::channel(true);

    let task = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.run(shutdown_rx, enabled_rx).await })
    };

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(1), task)
        .await
        .expect("run() should return promptly after shutdown")
        .unwrap()
        .unwrap();
}
