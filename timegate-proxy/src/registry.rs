//! The registry of logical databases
//!
//! Built once from a configuration and immutable afterwards; hot reloads
//! build a fresh registry and swap it in behind the lifecycle engine.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use timegate_core::{GateError, GateResult};

use crate::backend::BackendFactory;
use crate::config::ProxyConfig;
use crate::database::Database;
use crate::metrics::ProxyMetrics;

#[derive(Debug)]
pub struct Registry {
    databases: HashMap<String, Arc<Database>>,
}

impl Registry {
    /// A registry serving no databases at all.
    pub fn empty() -> Registry {
        Registry {
            databases: HashMap::new(),
        }
    }

    /// Build every configured database. Duplicate names are a fatal config
    /// error; on any failure every handle already created is closed.
    pub fn new(
        config: &ProxyConfig,
        factory: &dyn BackendFactory,
        metrics: Arc<ProxyMetrics>,
    ) -> GateResult<Registry> {
        let mut databases: HashMap<String, Arc<Database>> = HashMap::new();
        for db_config in &config.databases {
            let database = match Database::new(db_config, factory, metrics.clone()) {
                Ok(db) => db,
                Err(err) => {
                    close_all(databases.values());
                    return Err(err);
                }
            };
            if databases.contains_key(database.name()) {
                let err = GateError::Config(format!(
                    "duplicate database name: {}",
                    database.name()
                ));
                if let Err(close_err) = database.close() {
                    warn!("error closing database during cleanup: {}", close_err);
                }
                close_all(databases.values());
                return Err(err);
            }
            databases.insert(database.name().to_string(), Arc::new(database));
        }
        Ok(Registry { databases })
    }

    pub fn get(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.get(name).cloned()
    }

    /// Configured database names in ascending lexicographic order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.keys().cloned().collect();
        names.sort();
        names
    }

    /// Close every backend handle. Every database is attempted even when
    /// an earlier one fails; the last error wins.
    pub fn close(&self) -> GateResult<()> {
        let mut result = Ok(());
        for database in self.databases.values() {
            if let Err(err) = database.close() {
                result = Err(err);
            }
        }
        result
    }
}

fn close_all<'a>(databases: impl Iterator<Item = &'a Arc<Database>>) {
    for database in databases {
        if let Err(err) = database.close() {
            warn!("error closing database during cleanup: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::mock_backend::MockStore;

    fn config_with_names(names: &[&str]) -> ProxyConfig {
        ProxyConfig {
            databases: names
                .iter()
                .map(|n| DatabaseConfig {
                    name: n.to_string(),
                    primaries: vec![],
                    aggregators: vec![],
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_names_sorted_ascending() {
        let store = MockStore::new();
        let registry = Registry::new(
            &config_with_names(&["scotty", "both", "nothing", "influx"]),
            &store,
            Arc::new(ProxyMetrics::new()),
        )
        .unwrap();
        assert_eq!(registry.names(), vec!["both", "influx", "nothing", "scotty"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let store = MockStore::new();
        let err = Registry::new(
            &config_with_names(&["x", "x"]),
            &store,
            Arc::new(ProxyMetrics::new()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate database name"));
    }

    #[test]
    fn test_lookup() {
        let store = MockStore::new();
        let registry = Registry::new(
            &config_with_names(&["metrics"]),
            &store,
            Arc::new(ProxyMetrics::new()),
        )
        .unwrap();
        assert!(registry.get("metrics").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_empty_registry() {
        assert!(Registry::empty().names().is_empty());
        assert!(Registry::empty().close().is_ok());
    }
}
