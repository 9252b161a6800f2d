//! FRPClient reconciliation: render `frpc.ini` into `frpc-<name>-config`

use std::sync::Arc;

use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use tracing::{info, instrument};

use frp_common::crd::{FrpClient, FrpClientStatus, CLIENT_CONFIG_KEY};
use frp_common::object::OwnerScope;
use frp_common::store::ObjectStore;
use frp_common::{deterministic_hash, Error, Result};

use super::{wire_document, write_config_secret, Context, RESYNC_INTERVAL};

/// Reconcile a watched FRPClient
pub async fn reconcile(obj: Arc<DynamicObject>, ctx: Arc<Context>) -> Result<Action> {
    let client = FrpClient::from_value(wire_document(&obj)?)?;
    apply(client, ctx.store.as_ref()).await
}

/// Render the client's `[common]` config and record its hash
#[instrument(
    skip(client, store),
    fields(client = %client.name(), namespace = ?client.namespace())
)]
pub async fn apply(mut client: FrpClient, store: &dyn ObjectStore) -> Result<Action> {
    let namespace = client
        .namespace()
        .map(str::to_string)
        .ok_or_else(|| {
            Error::validation_for_field(
                client.name(),
                "metadata.namespace",
                "namespace is required",
            )
        })?;

    let mut scope = OwnerScope::new();
    let owned = scope.enter(client.owner_reference(true, true)?);

    let config = client.config(store).await?;
    write_config_secret(
        store,
        &owned,
        &namespace,
        format!("frpc-{}-config", client.name()),
        CLIENT_CONFIG_KEY,
        &config,
    )
    .await?;

    let status = FrpClientStatus {
        config_hash: Some(deterministic_hash(&config)),
    };
    if client.status.as_ref() != Some(&status) {
        info!(config_hash = ?status.config_hash, "client config changed");
        client.patch_status(store, &status).await?;
    }

    Ok(Action::requeue(RESYNC_INTERVAL))
}
