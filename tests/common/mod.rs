use kube_lvs_ctl::model::{
    ClusterConfig, EndpointRef, IpvsOptions, Node, NodesList, PortMap, ServiceDef, ServicesIndex,
};

pub fn node(name: &str, addr: &str, unschedulable: bool, endpoints: &[(&str, &str, bool)]) -> Node {
    Node {
        name: name.to_string(),
        addresses: vec![addr.to_string()],
        unschedulable,
        endpoints: endpoints
            .iter()
            .map(|(ns, svc, ready)| EndpointRef {
                namespace: ns.to_string(),
                service: svc.to_string(),
                ready: *ready,
            })
            .collect(),
    }
}

pub fn services_index() -> ServicesIndex {
    let mut idx = ServicesIndex::default();
    idx.insert("default", "web", "http", "10.96.0.1", 8080);
    idx
}

pub fn config_with_vip(vip: &str, port: &str) -> ClusterConfig {
    let mut ports = PortMap::new();
    ports.insert(
        port.to_string(),
        ServiceDef {
            namespace: "default".to_string(),
            service: "web".to_string(),
            port_name: "http".to_string(),
            ipvs_options: IpvsOptions::default(),
        },
    );
    let mut config = ClusterConfig::default();
    config.config.insert(vip.to_string(), ports);
    config
}

pub fn two_node_list() -> NodesList {
    NodesList(vec![
        node("n1", "192.168.0.1", false, &[("default", "web", true)]),
        node("n2", "192.168.0.2", false, &[("default", "web", true)]),
    ])
}
