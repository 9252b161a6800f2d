//! FRP Operator - renders FRP server and client configuration from custom resources

use std::sync::Arc;

use clap::Parser;
use kube::Client;

use frp_common::store::{KubeStore, ObjectStore};
use frp_operator::api::{self, AppState};
use frp_operator::controller::{build_controllers, Context};
use frp_operator::index::ConfigIndex;
use frp_operator::startup::{crd_yaml, ensure_crds};
use frp_operator::telemetry::init_telemetry;
use frp_operator::watch::{watch_endpoints, watch_namespaces};

/// FRP operator - manages FRPServer, FRPClient and FRPClientEndpoint resources
#[derive(Parser, Debug)]
#[command(name = "frp-operator", version, about, long_about = None)]
struct Cli {
    /// Port of the config API
    #[arg(long, env = "PORT", default_value_t = 4032)]
    port: u16,

    /// Field manager name used for server-side apply and patches
    #[arg(long, env = "FIELD_MANAGER", default_value = "frp-operator")]
    field_manager: String,

    /// Server-side watch timeout in seconds; must stay below the client read timeout
    #[arg(long, env = "WATCH_TIMEOUT_SECS", default_value_t = 25)]
    watch_timeout_secs: u32,

    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Do not install CRDs on startup
    #[arg(long, env = "SKIP_CRD_INSTALL")]
    skip_crd_install: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_yaml()?);
        return Ok(());
    }

    init_telemetry()?;
    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if cli.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        ensure_crds(&client, &cli.field_manager).await?;
    }

    let store: Arc<dyn ObjectStore> =
        Arc::new(KubeStore::new(client.clone(), cli.field_manager.clone()));
    let index = Arc::new(ConfigIndex::new());

    tracing::info!("Starting controllers:");
    let controllers = build_controllers(
        client.clone(),
        Arc::new(Context::new(store.clone())),
        cli.watch_timeout_secs,
    );

    let namespaces = tokio::spawn(watch_namespaces(
        client.clone(),
        index.clone(),
        cli.watch_timeout_secs,
    ));
    let endpoints = tokio::spawn(watch_endpoints(client, index.clone(), cli.watch_timeout_secs));

    let server = api::serve(AppState { store, index }, cli.port);

    // Controllers stop on SIGTERM/SIGINT; the API and watchers go with them
    tokio::select! {
        _ = futures::future::join_all(controllers) => {
            tracing::info!("Controllers stopped, shutting down");
        }
        result = server => {
            result.map_err(|e| anyhow::anyhow!("Config API failed: {}", e))?;
        }
    }

    namespaces.abort();
    endpoints.abort();
    Ok(())
}
