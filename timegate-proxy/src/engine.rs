//! Lifecycle engine
//!
//! Queries can be in flight while the configuration is hot-swapped, so
//! the active registry is handed out through leases. A retired registry
//! is only torn down after its last lease drops; tearing down early would
//! close backend handles out from under running queries.

use chrono::Utc;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use timegate_core::{GateError, GateResult, Query, Response};

use crate::metrics::ProxyMetrics;
use crate::registry::Registry;

struct LeaseState {
    in_use: i64,
    close_requested: bool,
    closed: bool,
}

/// A registry plus the bookkeeping that defers its teardown.
pub struct RegistryCell {
    registry: Registry,
    state: Mutex<LeaseState>,
}

impl RegistryCell {
    fn new(registry: Registry) -> Arc<RegistryCell> {
        Arc::new(RegistryCell {
            registry,
            state: Mutex::new(LeaseState {
                in_use: 0,
                close_requested: false,
                closed: false,
            }),
        })
    }

    fn open(self: &Arc<Self>) -> RegistryLease {
        self.state.lock().in_use += 1;
        RegistryLease {
            cell: self.clone(),
        }
    }

    fn release(&self) {
        let should_close = {
            let mut state = self.state.lock();
            state.in_use -= 1;
            assert!(
                state.in_use >= 0,
                "registry lease released more times than it was acquired"
            );
            if state.in_use == 0 && state.close_requested && !state.closed {
                state.closed = true;
                true
            } else {
                false
            }
        };
        if should_close {
            if let Err(err) = self.registry.close() {
                warn!("error closing retired registry: {}", err);
            }
        }
    }

    /// Mark this registry for teardown. If nothing holds a lease the
    /// teardown happens immediately; otherwise the last lease performs it.
    fn request_close(&self) {
        let should_close = {
            let mut state = self.state.lock();
            state.close_requested = true;
            if state.in_use == 0 && !state.closed {
                state.closed = true;
                true
            } else {
                false
            }
        };
        if should_close {
            if let Err(err) = self.registry.close() {
                warn!("error closing retired registry: {}", err);
            }
        }
    }
}

/// A borrowed reference to the active registry. Dropping the lease may
/// trigger the deferred teardown of a retired registry.
pub struct RegistryLease {
    cell: Arc<RegistryCell>,
}

impl Deref for RegistryLease {
    type Target = Registry;

    fn deref(&self) -> &Registry {
        &self.cell.registry
    }
}

impl Drop for RegistryLease {
    fn drop(&mut self) {
        self.cell.release();
    }
}

/// The query engine: the active registry behind a swap point, plus the
/// service metrics.
pub struct FederationEngine {
    current: Mutex<Arc<RegistryCell>>,
    metrics: Arc<ProxyMetrics>,
}

impl FederationEngine {
    /// An engine with no configuration; every query fails with an unknown
    /// database until a registry is installed.
    pub fn new(metrics: Arc<ProxyMetrics>) -> FederationEngine {
        FederationEngine {
            current: Mutex::new(RegistryCell::new(Registry::empty())),
            metrics,
        }
    }

    pub fn with_registry(registry: Registry, metrics: Arc<ProxyMetrics>) -> FederationEngine {
        FederationEngine {
            current: Mutex::new(RegistryCell::new(registry)),
            metrics,
        }
    }

    /// Install a replacement registry. The old one is torn down once its
    /// outstanding leases drop.
    pub fn install(&self, registry: Registry) {
        let cell = RegistryCell::new(registry);
        let old = std::mem::replace(&mut *self.current.lock(), cell);
        old.request_close();
        info!("installed new registry configuration");
    }

    /// Take a lease on the active registry.
    pub fn acquire(&self) -> RegistryLease {
        self.current.lock().open()
    }

    /// Configured database names, ascending.
    pub fn names(&self) -> Vec<String> {
        self.acquire().names()
    }

    /// Parse and execute one query against a logical database.
    pub async fn query(
        &self,
        query_text: &str,
        database: &str,
        epoch: &str,
    ) -> GateResult<Response> {
        let started = Instant::now();
        let result = self.query_inner(query_text, database, epoch).await;
        self.metrics.record_query(started.elapsed(), result.is_err());
        result
    }

    async fn query_inner(
        &self,
        query_text: &str,
        database: &str,
        epoch: &str,
    ) -> GateResult<Response> {
        let lease = self.acquire();
        let now = Utc::now();
        let query = Query::parse(query_text, now)?;
        let db = lease
            .get(database)
            .ok_or_else(|| GateError::NoSuchDatabase(database.to_string()))?;
        db.query(&query, epoch, now).await
    }
}
