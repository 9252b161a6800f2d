//! In-process object store
//!
//! Mirrors the API server semantics the typed objects rely on: create fails
//! on an existing key, merge patches leave unspecified fields alone, the
//! `status` subresource is patched separately, and deletes cascade through
//! owner references. Used by tests and local dry runs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::debug;

use super::{merge_patch, ObjectKey, ObjectStore, Propagation};
use crate::{Error, Result};

/// Object store backed by a concurrent in-memory map
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<ObjectKey, Value>,
    next_uid: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate (or clear) a transport outage; every call fails while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Put a document directly, bypassing create semantics.
    ///
    /// Server-managed metadata (uid, resourceVersion) is filled in when
    /// missing.
    pub fn seed(&self, key: &ObjectKey, mut body: Value) {
        self.stamp(key, &mut body);
        self.objects.insert(key.clone(), body);
    }

    /// Current stored document for `key`
    pub fn snapshot(&self, key: &ObjectKey) -> Option<Value> {
        self.objects.get(key).map(|doc| doc.value().clone())
    }

    /// Whether `key` is stored
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::remote_unavailable("memory store marked unavailable"))
        } else {
            Ok(())
        }
    }

    fn stamp(&self, key: &ObjectKey, body: &mut Value) {
        merge_patch(
            body,
            &json!({
                "apiVersion": key.api.api_version(),
                "kind": key.api.kind,
                "metadata": {
                    "name": key.name,
                    "namespace": key.namespace,
                }
            }),
        );
        let metadata = &mut body["metadata"];
        if metadata.get("uid").and_then(Value::as_str).is_none() {
            let uid = self.next_uid.fetch_add(1, Ordering::SeqCst) + 1;
            metadata["uid"] = json!(format!("memory-uid-{uid}"));
        }
        bump_resource_version(body);
    }

    /// Remove or detach everything owned (transitively) by `owner_uid`
    fn cascade(&self, owner_uid: String, propagation: Propagation) {
        let mut pending = vec![owner_uid];
        while let Some(uid) = pending.pop() {
            let dependents: Vec<ObjectKey> = self
                .objects
                .iter()
                .filter(|entry| owned_by(entry.value(), &uid))
                .map(|entry| entry.key().clone())
                .collect();

            for key in dependents {
                match propagation {
                    Propagation::Orphan => {
                        if let Some(mut doc) = self.objects.get_mut(&key) {
                            detach_owner(doc.value_mut(), &uid);
                        }
                    }
                    Propagation::Foreground | Propagation::Background => {
                        if let Some((_, doc)) = self.objects.remove(&key) {
                            debug!(object = %key, "garbage collecting dependent");
                            if let Some(child_uid) = uid_of(&doc) {
                                pending.push(child_uid);
                            }
                        }
                    }
                }
            }
        }
    }
}

fn uid_of(doc: &Value) -> Option<String> {
    doc.pointer("/metadata/uid")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn owned_by(doc: &Value, uid: &str) -> bool {
    doc.pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .is_some_and(|refs| refs.iter().any(|r| r["uid"] == uid))
}

fn detach_owner(doc: &mut Value, uid: &str) {
    if let Some(refs) = doc
        .pointer_mut("/metadata/ownerReferences")
        .and_then(Value::as_array_mut)
    {
        refs.retain(|r| r["uid"] != uid);
    }
}

fn bump_resource_version(doc: &mut Value) {
    let next = doc
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    doc["metadata"]["resourceVersion"] = json!(next.to_string());
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>> {
        self.check_available()?;
        Ok(self.snapshot(key))
    }

    async fn create(&self, key: &ObjectKey, body: &Value) -> Result<Value> {
        self.check_available()?;
        match self.objects.entry(key.clone()) {
            Entry::Occupied(_) => Err(Error::already_exists(key.api.kind, key.qualified_name())),
            Entry::Vacant(slot) => {
                let mut doc = body.clone();
                if let Some(metadata) = doc.get_mut("metadata").and_then(Value::as_object_mut) {
                    metadata.remove("uid");
                    metadata.remove("resourceVersion");
                }
                self.stamp(key, &mut doc);
                slot.insert(doc.clone());
                Ok(doc)
            }
        }
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &Value,
        subresource: Option<&'static str>,
    ) -> Result<Value> {
        self.check_available()?;
        let mut doc = self
            .objects
            .get_mut(key)
            .ok_or_else(|| Error::not_found(key.api.kind, key.qualified_name()))?;

        match subresource {
            Some(sub) => {
                let part = patch.get(sub).cloned().unwrap_or(Value::Null);
                let target = doc.value_mut();
                if part.is_null() {
                    if let Some(map) = target.as_object_mut() {
                        map.remove(sub);
                    }
                } else {
                    merge_patch(&mut target[sub], &part);
                }
            }
            None => {
                let mut main = patch.clone();
                if let Some(map) = main.as_object_mut() {
                    map.remove("status");
                }
                merge_patch(doc.value_mut(), &main);
            }
        }
        bump_resource_version(doc.value_mut());
        Ok(doc.value().clone())
    }

    async fn delete(&self, key: &ObjectKey, propagation: Propagation) -> Result<()> {
        self.check_available()?;
        let (_, doc) = self
            .objects
            .remove(key)
            .ok_or_else(|| Error::not_found(key.api.kind, key.qualified_name()))?;
        if let Some(uid) = uid_of(&doc) {
            self.cascade(uid, propagation);
        }
        Ok(())
    }
}
