//! Typed remote objects
//!
//! An [`Object`] pairs a locally owned spec with its metadata and keeps both
//! in sync with a remote [`ObjectStore`]. The remote store is the single
//! source of truth: two in-process copies of the same object are never
//! reconciled with each other, and writes are merge patches where the last
//! writer wins.

mod owner;
pub mod schema;

use std::collections::BTreeMap;
use std::fmt::Debug;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::labels::LabelSet;
use crate::store::{ApiType, ObjectKey, ObjectStore, Propagation};
use crate::{Error, Result};

pub use owner::{OwnerGuard, OwnerReference, OwnerScope};

/// A sub-document kept next to the spec, e.g. controller-written status
pub trait StatusDocument:
    Serialize + DeserializeOwned + JsonSchema + Clone + Debug + Send + Sync + 'static
{
    /// Name of the subresource the document is written through, if any
    const SUBRESOURCE: Option<&'static str> = Some("status");
}

/// Status type for kinds without a status document
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct NoStatus {}

impl StatusDocument for NoStatus {
    const SUBRESOURCE: Option<&'static str> = None;
}

/// The declarative part of an object kind
pub trait ObjectSpec:
    Serialize + DeserializeOwned + JsonSchema + Clone + Debug + Send + Sync + 'static
{
    /// Status document type ([`NoStatus`] when the kind has none)
    type Status: StatusDocument;

    /// Remote kind description
    const API: ApiType;

    /// Top-level field the spec is stored under
    const SPEC_FIELD: &'static str = "spec";
}

/// Object metadata, the subset this operator reads and writes
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name
    pub name: String,
    /// Namespace (None for cluster-scoped kinds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "crate::labels::label_set_schema")]
    pub labels: LabelSet,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Owners whose deletion collects this object
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    /// Finalizers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    /// Server-assigned UID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Server-assigned resource version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ObjectMeta {
    /// Metadata for `name` in `namespace`
    pub fn namespaced(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// A typed object of kind `S::API`
#[derive(Clone, Debug)]
pub struct Object<S: ObjectSpec> {
    /// Metadata
    pub metadata: ObjectMeta,
    /// Desired state
    pub spec: S,
    /// Observed state, if the remote has any
    pub status: Option<S::Status>,
}

impl<S: ObjectSpec> Object<S> {
    /// Construct locally.
    ///
    /// When `metadata` carries no owner references and an owner is active in
    /// `owners`, the object defaults to being owned by it.
    pub fn new(mut metadata: ObjectMeta, spec: S, owners: Option<&OwnerScope>) -> Self {
        if metadata.owner_references.is_empty() {
            if let Some(scope) = owners {
                metadata.owner_references = scope.default_owner_references();
            }
        }
        Self {
            metadata,
            spec,
            status: None,
        }
    }

    /// Object name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Object namespace
    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Remote identity
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(S::API, self.namespace(), self.name())
    }

    fn display_name(&self) -> String {
        self.key().qualified_name()
    }

    /// Wire document: `apiVersion`, `kind`, `metadata`, spec field and status
    pub fn to_value(&self) -> Result<Value> {
        let mut doc = Map::new();
        doc.insert("apiVersion".into(), json!(S::API.api_version()));
        doc.insert("kind".into(), json!(S::API.kind));
        doc.insert("metadata".into(), serde_json::to_value(&self.metadata)?);
        doc.insert(
            S::SPEC_FIELD.into(),
            serde_json::to_value(&self.spec)
                .map_err(|e| Error::serialization_for_kind(S::API.kind, e.to_string()))?,
        );
        if let Some(status) = &self.status {
            doc.insert("status".into(), serde_json::to_value(status)?);
        }
        Ok(Value::Object(doc))
    }

    /// Parse a wire document
    pub fn from_value(mut value: Value) -> Result<Self> {
        let parse_err =
            |e: serde_json::Error| Error::serialization_for_kind(S::API.kind, e.to_string());
        let metadata = value
            .get_mut("metadata")
            .map(Value::take)
            .unwrap_or(Value::Null);
        let metadata = serde_json::from_value(metadata).map_err(parse_err)?;
        let spec = match value.get_mut(S::SPEC_FIELD).map(Value::take) {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(spec) => spec,
        };
        let spec = serde_json::from_value(spec).map_err(parse_err)?;
        let status = match value.get_mut("status").map(Value::take) {
            Some(Value::Null) | None => None,
            Some(status) => Some(serde_json::from_value(status).map_err(parse_err)?),
        };
        Ok(Self {
            metadata,
            spec,
            status,
        })
    }

    fn sync(&mut self, remote: Value) -> Result<()> {
        *self = Self::from_value(remote)?;
        Ok(())
    }

    /// Fetch `name`; NotFound when absent
    pub async fn get(store: &dyn ObjectStore, namespace: Option<&str>, name: &str) -> Result<Self> {
        Self::find(store, namespace, name).await?.ok_or_else(|| {
            let key = ObjectKey::new(S::API, namespace, name);
            Error::not_found(S::API.kind, key.qualified_name())
        })
    }

    /// Fetch `name` if it exists
    pub async fn find(
        store: &dyn ObjectStore,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Self>> {
        let key = ObjectKey::new(S::API, namespace, name);
        store.get(&key).await?.map(Self::from_value).transpose()
    }

    /// Whether the object exists remotely. Only absence maps to `false`.
    pub async fn exists(&self, store: &dyn ObjectStore) -> Result<bool> {
        Ok(store.get(&self.key()).await?.is_some())
    }

    /// Replace local state with the remote state
    pub async fn reload(&mut self, store: &dyn ObjectStore) -> Result<()> {
        let key = self.key();
        match store.get(&key).await? {
            Some(remote) => self.sync(remote),
            None => Err(Error::not_found(S::API.kind, key.qualified_name())),
        }
    }

    /// Create the object; AlreadyExists if present
    pub async fn create(&mut self, store: &dyn ObjectStore) -> Result<()> {
        let body = self.to_value()?;
        let created = store.create(&self.key(), &body).await?;
        self.sync(created)
    }

    /// Merge local metadata and spec onto the remote object; NotFound if absent.
    ///
    /// Fields the local copy omits keep their remote value. Status is left
    /// to [`Object::patch_status`].
    pub async fn update(&mut self, store: &dyn ObjectStore) -> Result<()> {
        let mut body = self.to_value()?;
        if let Some(doc) = body.as_object_mut() {
            doc.remove("status");
        }
        if let Some(meta) = body.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("resourceVersion");
            meta.remove("uid");
        }
        let updated = store.patch(&self.key(), &body, None).await?;
        self.sync(updated)
    }

    /// Apply a caller-built merge patch and sync with the result
    pub async fn patch(&mut self, store: &dyn ObjectStore, patch: &Value) -> Result<()> {
        let patched = store.patch(&self.key(), patch, None).await?;
        self.sync(patched)
    }

    /// Merge `status` into the status subresource
    pub async fn patch_status(
        &mut self,
        store: &dyn ObjectStore,
        status: &S::Status,
    ) -> Result<()> {
        let Some(sub) = S::Status::SUBRESOURCE else {
            return Err(Error::validation_for(
                S::API.kind,
                "kind has no status subresource",
            ));
        };
        let mut body = Map::new();
        body.insert(sub.into(), serde_json::to_value(status)?);
        let body = Value::Object(body);
        let patched = store.patch(&self.key(), &body, Some(sub)).await?;
        self.sync(patched)
    }

    /// Update if present, otherwise create.
    ///
    /// The existence check and the write are separate calls. A create that
    /// loses a race falls back to update once, and an update of an object
    /// removed in between falls back to create once.
    pub async fn upsert(&mut self, store: &dyn ObjectStore) -> Result<()> {
        if self.exists(store).await? {
            match self.update(store).await {
                Err(e) if e.is_not_found() => {
                    debug!(object = %self.key(), "removed before update, creating");
                    self.create(store).await
                }
                other => other,
            }
        } else {
            match self.create(store).await {
                Err(e) if e.is_already_exists() => {
                    debug!(object = %self.key(), "created concurrently, updating");
                    self.update(store).await
                }
                other => other,
            }
        }
    }

    /// Delete the remote object
    pub async fn delete(&self, store: &dyn ObjectStore, propagation: Propagation) -> Result<()> {
        store.delete(&self.key(), propagation).await
    }

    /// Reference to this object for use as an owner.
    ///
    /// Requires a server-assigned UID, i.e. the object must have been
    /// created or loaded.
    pub fn owner_reference(
        &self,
        controller: bool,
        block_owner_deletion: bool,
    ) -> Result<OwnerReference> {
        let uid = self.metadata.uid.clone().ok_or_else(|| {
            Error::validation_for_field(
                self.display_name(),
                "metadata.uid",
                "owner has not been persisted",
            )
        })?;
        Ok(OwnerReference {
            api_version: S::API.api_version(),
            kind: S::API.kind.to_string(),
            name: self.metadata.name.clone(),
            uid,
            controller,
            block_owner_deletion,
        })
    }
}
