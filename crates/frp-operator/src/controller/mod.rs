//! FRPServer and FRPClient controllers
//!
//! Both kinds are watched as dynamic objects and converted into their typed
//! form at the start of each reconcile. The reconcile bodies only talk to an
//! [`ObjectStore`], so they run unchanged against the in-memory store in
//! tests.

pub mod client;
pub mod server;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use tracing::{error, info};

use frp_common::crd::{FRP_CLIENT_API, FRP_SERVER_API};
use frp_common::object::{ObjectMeta, OwnerScope};
use frp_common::secret::DecodedSecret;
use frp_common::store::{api_resource, ObjectStore};
use frp_common::{Error, Result, LABEL_MANAGED_BY, LABEL_MANAGED_BY_FRP};

/// Interval between periodic re-renders of a healthy object
pub(crate) const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Requeue delay after a retryable failure
const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Shared reconcile context
#[derive(Clone)]
pub struct Context {
    /// Remote object store
    pub store: Arc<dyn ObjectStore>,
}

impl Context {
    /// Context over `store`
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

/// Error policy shared by both controllers
///
/// Retryable errors requeue after 30 seconds; anything else (invalid spec,
/// missing secret) waits for the object to change.
pub fn error_policy(obj: Arc<DynamicObject>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        object = %obj.name_any(),
        namespace = ?obj.namespace(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(RETRY_DELAY)
    } else {
        Action::await_change()
    }
}

/// Upsert config secret `name` holding `config` under `key`, owned by the
/// active owner in `owners`
pub(crate) async fn write_config_secret(
    store: &dyn ObjectStore,
    owners: &OwnerScope,
    namespace: &str,
    name: String,
    key: &str,
    config: &str,
) -> Result<()> {
    let data = BTreeMap::from([(key.to_string(), config.to_string())]);
    let meta = ObjectMeta::namespaced(name, namespace)
        .with_label(LABEL_MANAGED_BY, LABEL_MANAGED_BY_FRP);
    let mut secret = DecodedSecret::new(meta, data, Some(owners)).encode();
    secret.upsert(store).await
}

/// Convert a watched object into its wire document
pub(crate) fn wire_document(obj: &DynamicObject) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(obj)?)
}

/// Build the controller futures for FRPServer and FRPClient
pub fn build_controllers(
    client: Client,
    ctx: Arc<Context>,
    watch_timeout_secs: u32,
) -> Vec<Pin<Box<dyn Future<Output = ()> + Send>>> {
    let server_ar = api_resource(&FRP_SERVER_API);
    let servers: Api<DynamicObject> = Api::all_with(client.clone(), &server_ar);
    let client_ar = api_resource(&FRP_CLIENT_API);
    let clients: Api<DynamicObject> = Api::all_with(client.clone(), &client_ar);
    let secrets: Api<Secret> = Api::all(client);

    let server_ctrl = Controller::new_with(
        servers,
        WatcherConfig::default().timeout(watch_timeout_secs),
        server_ar,
    )
    .owns(
        secrets.clone(),
        WatcherConfig::default().timeout(watch_timeout_secs),
    )
    .shutdown_on_signal()
    .run(server::reconcile, error_policy, ctx.clone())
    .for_each(log_reconcile_result("FRPServer"));

    let client_ctrl = Controller::new_with(
        clients,
        WatcherConfig::default().timeout(watch_timeout_secs),
        client_ar,
    )
    .owns(secrets, WatcherConfig::default().timeout(watch_timeout_secs))
    .shutdown_on_signal()
    .run(client::reconcile, error_policy, ctx)
    .for_each(log_reconcile_result("FRPClient"));

    info!("- FRPServer controller");
    info!("- FRPClient controller");

    vec![Box::pin(server_ctrl), Box::pin(client_ctrl)]
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(std::result::Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
