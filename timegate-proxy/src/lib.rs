//! Timegate federation proxy
//!
//! Accepts a query addressed to a logical database and fans it out to the
//! physical backends behind it: retention-tiered primary stores and
//! sharded aggregation servers. The per-backend answers merge back into
//! the single response the client would have seen from one ideal store.

// Core modules
pub mod aggregate;
pub mod backend;
pub mod config;
pub mod database;
pub mod engine;
pub mod fanout;
pub mod handlers;
pub mod metrics;
pub mod mock_backend;
pub mod registry;
pub mod tiers;

use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;

// Re-export commonly used types
pub use config::ProxyConfig;
pub use engine::FederationEngine;
pub use metrics::ProxyMetrics;
pub use registry::Registry;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FederationEngine>,
    pub metrics: Arc<ProxyMetrics>,
    pub config: Arc<RwLock<ProxyConfig>>,
    pub config_path: Arc<PathBuf>,
}
