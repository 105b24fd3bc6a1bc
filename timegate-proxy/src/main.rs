use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use timegate_proxy::backend::HttpBackendFactory;
use timegate_proxy::handlers::{
    config_databases_handler, databases_handler, health_handler, metrics_handler, query_handler,
    reload_handler,
};
use timegate_proxy::{AppState, FederationEngine, ProxyConfig, ProxyMetrics, Registry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Locate and load configuration
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TIMEGATE_CONFIG").ok())
        .unwrap_or_else(|| "timegate.yml".to_string());
    let config = ProxyConfig::load(Path::new(&config_path))
        .with_context(|| format!("failed to load configuration from {}", config_path))?;
    info!(
        "loaded configuration from {} ({} databases)",
        config_path,
        config.databases.len()
    );

    // Build the initial registry of backend handles
    let metrics = Arc::new(ProxyMetrics::new());
    let factory = HttpBackendFactory::new();
    let registry = Registry::new(&config, &factory, metrics.clone())
        .context("failed to build registry")?;

    let engine = Arc::new(FederationEngine::with_registry(registry, metrics.clone()));

    let listen = std::env::var("TIMEGATE_BIND_ADDRESS").unwrap_or_else(|_| config.listen.clone());

    // Create shared state
    let state = AppState {
        engine,
        metrics,
        config: Arc::new(RwLock::new(config)),
        config_path: Arc::new(PathBuf::from(config_path)),
    };

    // Hot reload on SIGHUP
    #[cfg(unix)]
    {
        let state = state.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut hangup = match signal(SignalKind::hangup()) {
                Ok(stream) => stream,
                Err(err) => {
                    error!("cannot listen for SIGHUP: {}", err);
                    return;
                }
            };
            while hangup.recv().await.is_some() {
                info!("SIGHUP received, reloading configuration");
                if let Err(err) = timegate_proxy::handlers::reload_from_disk(&state) {
                    error!("configuration reload failed: {}", err);
                }
            }
        });
    }

    // Build router
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/query", get(query_handler))
        .route("/databases", get(databases_handler))
        .route("/config/databases", get(config_databases_handler))
        .route("/reload", post(reload_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state);

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {}", listen))?;
    info!("timegate proxy listening on {}", listen);
    axum::serve(listener, app).await?;

    Ok(())
}
