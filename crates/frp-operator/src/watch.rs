//! Notification watchers feeding the [`ConfigIndex`]
//!
//! The `on_*` handlers are the only code that mutates the index. The watch
//! loops translate kube watcher events into handler calls; after a relist,
//! keys the index holds but the relist did not return are removed.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::DynamicObject;
use kube::runtime::watcher::{self, Config as WatcherConfig, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use serde_json::Value;
use tracing::{debug, info, warn};

use frp_common::crd::{FrpClientEndpoint, FRP_CLIENT_ENDPOINT_API};
use frp_common::store::api_resource;
use frp_common::Result;

use crate::index::{ConfigIndex, NamespaceModel};

/// Record namespace `ns` and its labels
pub fn on_namespace_upserted(index: &ConfigIndex, ns: &Namespace) {
    let Some(name) = ns.metadata.name.as_deref() else {
        return;
    };
    let labels = ns.metadata.labels.clone().unwrap_or_default();
    debug!(namespace = %name, labels = labels.len(), "namespace observed");
    index.upsert_namespace(NamespaceModel::new(name, labels));
}

/// Forget namespace `name`
pub fn on_namespace_removed(index: &ConfigIndex, name: &str) {
    debug!(namespace = %name, "namespace removed");
    index.remove_namespace(name);
}

/// Validate and record endpoint `namespace/name` from its wire document.
///
/// An invalid document leaves any previous entry for the key in place.
pub fn on_endpoint_upserted(
    index: &ConfigIndex,
    namespace: &str,
    name: &str,
    doc: Value,
) -> Result<()> {
    let model = FrpClientEndpoint::from_value(doc).and_then(|endpoint| endpoint.to_model());
    match model {
        Ok(model) => {
            debug!(namespace = %namespace, endpoint = %name, "endpoint observed");
            index.upsert_endpoint(namespace, name, model);
            Ok(())
        }
        Err(error) => {
            warn!(
                namespace = %namespace,
                endpoint = %name,
                %error,
                "ignoring invalid endpoint, keeping previous state"
            );
            Err(error)
        }
    }
}

/// Forget endpoint `namespace/name`
pub fn on_endpoint_removed(index: &ConfigIndex, namespace: &str, name: &str) {
    debug!(namespace = %namespace, endpoint = %name, "endpoint removed");
    index.remove_endpoint(namespace, name);
}

/// Keys seen between `Init` and `InitDone` of a relist
#[derive(Debug)]
struct Relist<K> {
    seen: Option<HashSet<K>>,
}

impl<K: Eq + Hash> Relist<K> {
    fn new() -> Self {
        Self { seen: None }
    }

    fn begin(&mut self) {
        self.seen = Some(HashSet::new());
    }

    fn observe(&mut self, key: K) {
        if let Some(seen) = &mut self.seen {
            seen.insert(key);
        }
    }

    fn finish(&mut self) -> Option<HashSet<K>> {
        self.seen.take()
    }
}

/// Remove namespaces missing from a completed relist
fn prune_namespaces(index: &ConfigIndex, seen: &HashSet<String>) {
    for ns in index.namespaces() {
        if !seen.contains(&ns.name) {
            on_namespace_removed(index, &ns.name);
        }
    }
}

/// Remove endpoints missing from a completed relist
fn prune_endpoints(index: &ConfigIndex, seen: &HashSet<(String, String)>) {
    for key in index.endpoint_keys() {
        if !seen.contains(&key) {
            on_endpoint_removed(index, &key.0, &key.1);
        }
    }
}

/// Watch Namespaces until the stream ends
pub async fn watch_namespaces(client: Client, index: Arc<ConfigIndex>, timeout_secs: u32) {
    let api: Api<Namespace> = Api::all(client);
    let config = WatcherConfig::default().timeout(timeout_secs);
    let stream = watcher::watcher(api, config).default_backoff();
    tokio::pin!(stream);

    info!("Starting namespace watcher");
    let mut relist = Relist::new();
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Init) => relist.begin(),
            Ok(Event::InitApply(ns)) => {
                if let Some(name) = ns.metadata.name.clone() {
                    relist.observe(name);
                }
                on_namespace_upserted(&index, &ns);
            }
            Ok(Event::InitDone) => {
                if let Some(seen) = relist.finish() {
                    prune_namespaces(&index, &seen);
                }
            }
            Ok(Event::Apply(ns)) => on_namespace_upserted(&index, &ns),
            Ok(Event::Delete(ns)) => {
                if let Some(name) = ns.metadata.name.as_deref() {
                    on_namespace_removed(&index, name);
                }
            }
            Err(error) => warn!(%error, "namespace watch error"),
        }
    }
    info!("Namespace watcher stopped");
}

/// Watch FRPClientEndpoints until the stream ends
pub async fn watch_endpoints(client: Client, index: Arc<ConfigIndex>, timeout_secs: u32) {
    let ar = api_resource(&FRP_CLIENT_ENDPOINT_API);
    let api: Api<DynamicObject> = Api::all_with(client, &ar);
    let config = WatcherConfig::default().timeout(timeout_secs);
    let stream = watcher::watcher(api, config).default_backoff();
    tokio::pin!(stream);

    info!("Starting endpoint watcher");
    let mut relist = Relist::new();
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Init) => relist.begin(),
            Ok(Event::InitApply(obj)) => {
                if let Some(key) = identity(&obj) {
                    relist.observe(key.clone());
                    apply_endpoint(&index, &key, &obj);
                }
            }
            Ok(Event::InitDone) => {
                if let Some(seen) = relist.finish() {
                    prune_endpoints(&index, &seen);
                }
            }
            Ok(Event::Apply(obj)) => {
                if let Some(key) = identity(&obj) {
                    apply_endpoint(&index, &key, &obj);
                }
            }
            Ok(Event::Delete(obj)) => {
                if let Some((namespace, name)) = identity(&obj) {
                    on_endpoint_removed(&index, &namespace, &name);
                }
            }
            Err(error) => warn!(%error, "endpoint watch error"),
        }
    }
    info!("Endpoint watcher stopped");
}

fn identity(obj: &DynamicObject) -> Option<(String, String)> {
    Some((obj.metadata.namespace.clone()?, obj.metadata.name.clone()?))
}

fn apply_endpoint(index: &ConfigIndex, (namespace, name): &(String, String), obj: &DynamicObject) {
    match serde_json::to_value(obj) {
        Ok(doc) => {
            if let Err(error) = on_endpoint_upserted(index, namespace, name, doc) {
                debug!(namespace = %namespace, endpoint = %name, %error, "endpoint not applied");
            }
        }
        Err(error) => {
            warn!(namespace = %namespace, endpoint = %name, %error, "unserializable endpoint")
        }
    }
}
