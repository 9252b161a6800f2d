//! Remote object store boundary
//!
//! Typed objects talk to the declarative API through [`ObjectStore`], which
//! speaks plain JSON documents keyed by (group, version, kind, namespace,
//! name). [`KubeStore`] is the production implementation; [`MemoryStore`]
//! keeps documents in process with the same merge-patch and cascading-delete
//! semantics.

mod kube_store;
mod memory;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

#[cfg(test)]
use mockall::automock;

use crate::Result;

pub use kube_store::{api_resource, KubeStore};
pub use memory::MemoryStore;

/// Static description of an object kind on the remote API
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ApiType {
    /// API group (empty for the core group)
    pub group: &'static str,
    /// API version within the group
    pub version: &'static str,
    /// Kind name
    pub kind: &'static str,
    /// Lowercase plural used in resource paths
    pub plural: &'static str,
    /// Whether objects of this kind live in a namespace
    pub namespaced: bool,
}

impl ApiType {
    /// `group/version`, or bare `version` for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Lowercase singular name
    pub fn singular(&self) -> String {
        self.kind.to_lowercase()
    }
}

/// Identity of one remote object
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Kind description
    pub api: ApiType,
    /// Namespace (None for cluster-scoped kinds)
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Build a key for `name` in `namespace`
    pub fn new(api: ApiType, namespace: Option<&str>, name: &str) -> Self {
        Self {
            api,
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// `namespace/name`, or bare name for cluster-scoped objects
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.api.kind, self.qualified_name())
    }
}

/// Cascading behaviour for deletes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Propagation {
    /// Dependents are removed before the owner disappears
    Foreground,
    /// Owner is removed now, dependents are collected asynchronously
    #[default]
    Background,
    /// Dependents are kept and their owner references dropped
    Orphan,
}

/// CRUD operations against a declarative object API.
///
/// Bodies are full JSON documents including `apiVersion`, `kind` and
/// `metadata`. Implementations translate their transport errors into
/// [`crate::Error::NotFound`], [`crate::Error::AlreadyExists`] and
/// [`crate::Error::RemoteUnavailable`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>>;

    /// Create an object; fails with AlreadyExists if present
    async fn create(&self, key: &ObjectKey, body: &Value) -> Result<Value>;

    /// Apply a JSON merge patch, optionally to a subresource such as `status`.
    /// Fails with NotFound if the object is absent.
    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &Value,
        subresource: Option<&'static str>,
    ) -> Result<Value>;

    /// Delete an object with the given propagation policy
    async fn delete(&self, key: &ObjectKey, propagation: Propagation) -> Result<()>;
}

/// Apply a JSON merge patch (RFC 7386) to `target`.
///
/// Objects merge key by key, `null` removes a key, anything else replaces
/// the target value wholesale (arrays included).
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}
