//! kube-rs backed object store

use async_trait::async_trait;
use kube::api::{
    Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams, PropagationPolicy,
};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;
use tracing::debug;

use super::{ApiType, ObjectKey, ObjectStore, Propagation};
use crate::{Error, Result};

/// Object store talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    /// Create a store using `field_manager` as the manager of written fields
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, key: &ObjectKey) -> Api<DynamicObject> {
        let ar = api_resource(&key.api);
        match (&key.namespace, key.api.namespaced) {
            (Some(ns), true) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn classify(&self, key: &ObjectKey) -> impl Fn(kube::Error) -> Error + '_ {
        let name = key.qualified_name();
        let kind = key.api.kind;
        move |e| Error::from_kube(e, kind, &name)
    }
}

/// Build the kube-rs resource description for an [`ApiType`]
pub fn api_resource(api: &ApiType) -> ApiResource {
    ApiResource {
        group: api.group.to_string(),
        version: api.version.to_string(),
        api_version: api.api_version(),
        kind: api.kind.to_string(),
        plural: api.plural.to_string(),
    }
}

fn to_dynamic(key: &ObjectKey, body: &Value) -> Result<DynamicObject> {
    serde_json::from_value(body.clone())
        .map_err(|e| Error::serialization_for_kind(key.api.kind, e.to_string()))
}

fn to_json(key: &ObjectKey, obj: &DynamicObject) -> Result<Value> {
    serde_json::to_value(obj)
        .map_err(|e| Error::serialization_for_kind(key.api.kind, e.to_string()))
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Value>> {
        let found = self
            .api(key)
            .get_opt(&key.name)
            .await
            .map_err(self.classify(key))?;
        found.map(|obj| to_json(key, &obj)).transpose()
    }

    async fn create(&self, key: &ObjectKey, body: &Value) -> Result<Value> {
        let obj = to_dynamic(key, body)?;
        let pp = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        debug!(object = %key, "creating object");
        let created = self
            .api(key)
            .create(&pp, &obj)
            .await
            .map_err(self.classify(key))?;
        to_json(key, &created)
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &Value,
        subresource: Option<&'static str>,
    ) -> Result<Value> {
        let pp = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        let api = self.api(key);
        debug!(object = %key, ?subresource, "merge-patching object");
        let patched = match subresource {
            Some(sub) => api
                .patch_subresource(sub, &key.name, &pp, &Patch::Merge(patch))
                .await,
            None => api.patch(&key.name, &pp, &Patch::Merge(patch)).await,
        }
        .map_err(self.classify(key))?;
        to_json(key, &patched)
    }

    async fn delete(&self, key: &ObjectKey, propagation: Propagation) -> Result<()> {
        let dp = DeleteParams {
            propagation_policy: Some(match propagation {
                Propagation::Foreground => PropagationPolicy::Foreground,
                Propagation::Background => PropagationPolicy::Background,
                Propagation::Orphan => PropagationPolicy::Orphan,
            }),
            ..Default::default()
        };
        debug!(object = %key, ?propagation, "deleting object");
        self.api(key)
            .delete(&key.name, &dp)
            .await
            .map_err(self.classify(key))?;
        Ok(())
    }
}
