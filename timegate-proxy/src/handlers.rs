//! HTTP handlers for the federation proxy

use axum::{
    extract::{Query as QueryParams, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use timegate_core::{GateError, GateResult, Response};

use crate::backend::HttpBackendFactory;
use crate::config::ProxyConfig;
use crate::registry::Registry;
use crate::AppState;

/// Health check endpoint
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "timegate-proxy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render_prometheus()
}

/// Query string for the main query endpoint.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub db: String,
    pub q: String,
    #[serde(default)]
    pub epoch: String,
}

/// Main query endpoint: parse, federate, merge.
pub async fn query_handler(
    State(state): State<AppState>,
    QueryParams(request): QueryParams<QueryRequest>,
) -> Result<Json<Response>, (StatusCode, Json<Value>)> {
    debug!("query against '{}': {}", request.db, request.q);
    match state
        .engine
        .query(&request.q, &request.db, &request.epoch)
        .await
    {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            warn!("query failed: {}", err);
            let status = match &err {
                GateError::Parse(_)
                | GateError::TimeRange(_)
                | GateError::NoSuchDatabase(_)
                | GateError::Config(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::BAD_GATEWAY,
            };
            Err((status, Json(json!({ "error": err.to_string() }))))
        }
    }
}

/// Sorted list of the configured logical databases.
pub async fn databases_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "databases": state.engine.names() }))
}

/// Read-only view of the running configuration, per database: endpoints,
/// backend databases, and retention durations.
pub async fn config_databases_handler(State(state): State<AppState>) -> Json<Value> {
    let config = state.config.read().clone();
    Json(json!({ "databases": config.databases }))
}

/// Re-read the configuration file and swap in a fresh registry. A broken
/// file leaves the running registry untouched.
pub async fn reload_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match reload_from_disk(&state) {
        Ok(()) => Ok(Json(json!({ "status": "reloaded" }))),
        Err(err) => {
            warn!("configuration reload failed: {}", err);
            Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": err.to_string() })),
            ))
        }
    }
}

/// Shared reload path for the HTTP endpoint and the SIGHUP handler. The
/// replacement registry is fully constructed before the swap; only then is
/// the old one marked for teardown.
pub fn reload_from_disk(state: &AppState) -> GateResult<()> {
    let config = ProxyConfig::load(&state.config_path)?;
    let factory = HttpBackendFactory::new();
    let registry = Registry::new(&config, &factory, state.metrics.clone())?;
    state.engine.install(registry);
    *state.config.write() = config;
    state.metrics.record_reload();
    info!("configuration reloaded from {}", state.config_path.display());
    Ok(())
}
