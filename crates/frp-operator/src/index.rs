//! Config index: the namespaces and endpoints known to the operator
//!
//! Populated by the watchers in [`crate::watch`] and read by the aggregation
//! engine. Each namespace and each (namespace, name) endpoint is updated
//! atomically on its own; readers may observe any interleaving of updates to
//! different keys.

use dashmap::DashMap;

use frp_common::crd::EndpointModel;
use frp_common::labels::LabelSet;

/// A namespace as seen by the index
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceModel {
    /// Namespace name
    pub name: String,
    /// Namespace labels
    pub labels: LabelSet,
}

impl NamespaceModel {
    /// Namespace `name` with `labels`
    pub fn new(name: impl Into<String>, labels: LabelSet) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }
}

/// Thread-safe index of namespaces and endpoints
///
/// Endpoints are stored per namespace. The outer map is always locked before
/// an inner one.
#[derive(Debug, Default)]
pub struct ConfigIndex {
    namespaces: DashMap<String, NamespaceModel>,
    endpoints: DashMap<String, DashMap<String, EndpointModel>>,
}

impl ConfigIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a namespace
    pub fn upsert_namespace(&self, namespace: NamespaceModel) {
        self.namespaces.insert(namespace.name.clone(), namespace);
    }

    /// Remove a namespace. Its endpoints stay until they are removed
    /// themselves.
    pub fn remove_namespace(&self, name: &str) {
        self.namespaces.remove(name);
    }

    /// Insert or replace endpoint `namespace/name`
    pub fn upsert_endpoint(&self, namespace: &str, name: &str, endpoint: EndpointModel) {
        self.endpoints
            .entry(namespace.to_string())
            .or_default()
            .insert(name.to_string(), endpoint);
    }

    /// Remove endpoint `namespace/name`
    pub fn remove_endpoint(&self, namespace: &str, name: &str) {
        if let Some(endpoints) = self.endpoints.get(namespace) {
            endpoints.remove(name);
        }
    }

    /// Look up a namespace
    pub fn namespace(&self, name: &str) -> Option<NamespaceModel> {
        self.namespaces.get(name).map(|ns| ns.value().clone())
    }

    /// Snapshot of every namespace
    pub fn namespaces(&self) -> Vec<NamespaceModel> {
        self.namespaces.iter().map(|ns| ns.value().clone()).collect()
    }

    /// Snapshot of the endpoints in `namespace`
    pub fn endpoints_in(&self, namespace: &str) -> Vec<EndpointModel> {
        self.endpoints
            .get(namespace)
            .map(|endpoints| endpoints.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default()
    }

    /// Look up endpoint `namespace/name`
    pub fn endpoint(&self, namespace: &str, name: &str) -> Option<EndpointModel> {
        self.endpoints
            .get(namespace)
            .and_then(|endpoints| endpoints.get(name).map(|e| e.value().clone()))
    }

    /// `(namespace, name)` of every endpoint
    pub fn endpoint_keys(&self) -> Vec<(String, String)> {
        self.endpoints
            .iter()
            .flat_map(|endpoints| {
                let namespace = endpoints.key().clone();
                endpoints
                    .iter()
                    .map(|e| (namespace.clone(), e.key().clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Total number of endpoints
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.iter().map(|endpoints| endpoints.len()).sum()
    }
}
