//! FRPServer reconciliation
//!
//! Ensures the server has a token secret, renders `frps.ini` into the
//! `frps-<name>-config` secret, and records the config hash in status.

use std::sync::Arc;

use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use tracing::{debug, info, instrument};

use frp_common::crd::{FrpServer, FrpServerStatus, ServerToken, SERVER_CONFIG_KEY};
use frp_common::object::{ObjectMeta, OwnerScope};
use frp_common::secret::{DecodedSecret, TokenData};
use frp_common::store::ObjectStore;
use frp_common::{deterministic_hash, Error, Result, LABEL_MANAGED_BY, LABEL_MANAGED_BY_FRP};

use super::{wire_document, write_config_secret, Context, RESYNC_INTERVAL};

/// Reconcile a watched FRPServer
pub async fn reconcile(obj: Arc<DynamicObject>, ctx: Arc<Context>) -> Result<Action> {
    let server = FrpServer::from_value(wire_document(&obj)?)?;
    apply(server, ctx.store.as_ref()).await
}

/// Bring the server's derived objects and status up to date
#[instrument(
    skip(server, store),
    fields(server = %server.name(), namespace = ?server.namespace())
)]
pub async fn apply(mut server: FrpServer, store: &dyn ObjectStore) -> Result<Action> {
    let namespace = server
        .namespace()
        .map(str::to_string)
        .ok_or_else(|| {
            Error::validation_for_field(
                server.name(),
                "metadata.namespace",
                "namespace is required",
            )
        })?;

    let mut scope = OwnerScope::new();
    let owned = scope.enter(server.owner_reference(true, true)?);

    ensure_token(&mut server, store, &namespace, &owned).await?;

    let config = server.config(store).await?;
    write_config_secret(
        store,
        &owned,
        &namespace,
        format!("frps-{}-config", server.name()),
        SERVER_CONFIG_KEY,
        &config,
    )
    .await?;

    let status = FrpServerStatus {
        config_hash: Some(deterministic_hash(&config)),
        token_secret: server.spec.token_secret().map(str::to_string),
    };
    if server.status.as_ref() != Some(&status) {
        info!(config_hash = ?status.config_hash, "server config changed");
        server.patch_status(store, &status).await?;
    }

    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// Generate and assign a token secret when the server has none.
///
/// A token secret left over from an earlier attempt is reused as is.
async fn ensure_token(
    server: &mut FrpServer,
    store: &dyn ObjectStore,
    namespace: &str,
    owners: &OwnerScope,
) -> Result<()> {
    if server.spec.token_secret().is_some() {
        return Ok(());
    }

    let secret_name = format!("frps-{}-token", server.name());
    let meta = ObjectMeta::namespaced(&secret_name, namespace)
        .with_label(LABEL_MANAGED_BY, LABEL_MANAGED_BY_FRP);
    let mut secret = DecodedSecret::new(meta, TokenData::generate(), Some(owners)).encode();
    match secret.create(store).await {
        Ok(()) => info!(secret = %secret_name, "generated server token"),
        Err(e) if e.is_already_exists() => {
            debug!(secret = %secret_name, "reusing existing token secret")
        }
        Err(e) => return Err(e),
    }

    server.spec.token = Some(ServerToken {
        secret: Some(secret_name),
    });
    server.update(store).await
}
