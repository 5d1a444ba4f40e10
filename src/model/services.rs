use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Resolved `(namespace, service, portName) -> (clusterIP, numericPort)`
/// lookup. Rebuilt in full on each Service watch delivery and cached
/// inside the snapshot (spec.md §9 Design Notes: replace the 100ms
/// busy-poll translation with a recompute-on-delivery, cached value).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServicesIndex {
    entries: HashMap<(String, String, String), (String, u16)>,
}

impl ServicesIndex {
    pub fn insert(&mut self, namespace: &str, service: &str, port_name: &str, cluster_ip: &str, port: u16) {
        self.entries.insert(
            (namespace.to_string(), service.to_string(), port_name.to_string()),
            (cluster_ip.to_string(), port),
        );
    }

    /// Resolves a `ServiceDef`'s `(namespace, service, portName)` to a
    /// `(clusterIP, numericPort)` pair, or `None` if unresolved — the
    /// "skip the service if unresolved" rule of spec.md §4.3.
    pub fn resolve(&self, namespace: &str, service: &str, port_name: &str) -> Option<(&str, u16)> {
        self.entries
            .get(&(namespace.to_string(), service.to_string(), port_name.to_string()))
            .map(|(ip, port)| (ip.as_str(), *port))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_entry() {
        let mut idx = ServicesIndex::default();
        idx.insert("default", "web", "http", "10.96.0.1", 8080);
        assert_eq!(idx.resolve("default", "web", "http"), Some(("10.96.0.1", 8080)));
    }

    #[test]
    fn unresolved_returns_none() {
        let idx = ServicesIndex::default();
        assert_eq!(idx.resolve("default", "web", "http"), None);
    }
}
