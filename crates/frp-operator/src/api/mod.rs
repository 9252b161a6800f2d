//! HTTP query boundary
//!
//! Thin axum transport over the config renderers and the aggregation
//! engine. Every failure becomes a Kubernetes-style `Status` body; a partial
//! config is never returned.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::{info, warn};

use frp_common::crd::{FrpClient, FrpServer};
use frp_common::store::ObjectStore;
use frp_common::Error;

use crate::aggregate::client_services_config;
use crate::index::ConfigIndex;

/// State shared by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Remote object store
    pub store: Arc<dyn ObjectStore>,
    /// Config index fed by the watchers
    pub index: Arc<ConfigIndex>,
}

/// Rendered config payload
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    /// INI text
    pub config: String,
}

/// Handler error, rendered as a `Status` object
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::MissingSecret { .. } => StatusCode::FAILED_DEPENDENCY,
            Error::RemoteUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(error = %self.0, code = status.as_u16(), "config request failed");

        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": self.0.to_string(),
            "code": status.as_u16()
        });

        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/frps/{namespace}/{name}/config", get(server_config))
        .route("/frpc/{namespace}/{name}/config", get(client_config))
        .route(
            "/frpc/{namespace}/{name}/config/services",
            get(client_services),
        )
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve the router on `0.0.0.0:port` until the process is stopped
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Config API listening");
    axum::serve(listener, router(state)).await
}

async fn server_config(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<ConfigResponse>> {
    let store = state.store.as_ref();
    let server = FrpServer::get(store, Some(&namespace), &name).await?;
    let config = server.config(store).await?;
    Ok(Json(ConfigResponse { config }))
}

async fn client_config(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<ConfigResponse>> {
    let store = state.store.as_ref();
    let client = FrpClient::get(store, Some(&namespace), &name).await?;
    let config = client.config(store).await?;
    Ok(Json(ConfigResponse { config }))
}

async fn client_services(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<ConfigResponse>> {
    let config =
        client_services_config(state.store.as_ref(), &state.index, &namespace, &name).await?;
    Ok(Json(ConfigResponse { config }))
}
