//! Retention-tiered primary backends
//!
//! Each tier holds a finite window of history at some granularity. A query
//! is split into one subquery per tier, clipped on the left by that tier's
//! retention and offered data up to `now` on the right: if a tier with
//! finer-grained data goes down, a longer-retention tier can fill in the
//! missing times.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::warn;

use timegate_core::{GateResult, Query, Response};

use crate::backend::{Backend, BackendFactory};
use crate::config::TierConfig;
use crate::fanout::{run_merged, Subquery};
use crate::metrics::ProxyMetrics;

/// One retention-tiered primary backend.
pub struct Tier {
    endpoint: String,
    database: String,
    retention: Duration,
    handle: Arc<dyn Backend>,
}

impl std::fmt::Debug for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier")
            .field("endpoint", &self.endpoint)
            .field("database", &self.database)
            .field("retention", &self.retention)
            .finish()
    }
}

impl Tier {
    pub fn new(config: &TierConfig, factory: &dyn BackendFactory) -> GateResult<Tier> {
        let handle = factory.create(&config.host_and_port)?;
        Ok(Tier {
            endpoint: config.host_and_port.clone(),
            database: config.database.clone(),
            retention: config.duration,
            handle,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn close(&self) -> GateResult<()> {
        self.handle.close()
    }
}

#[async_trait]
impl Subquery for Tier {
    async fn run(&self, query: &Query, epoch: &str) -> GateResult<Response> {
        self.handle
            .execute(&query.to_string(), &self.database, epoch)
            .await
    }
}

/// The ordered set of tiers for one logical database. Tiers are kept
/// sorted by retention descending, which combined with the merge rule
/// (later input wins) makes the finest-grained data win on overlapping
/// timestamps.
#[derive(Debug)]
pub struct TierSet {
    tiers: Vec<Arc<Tier>>,
    metrics: Arc<ProxyMetrics>,
}

impl TierSet {
    /// Build the set, longest retention first. A handle that was already
    /// created is closed again if a later sibling fails to build.
    pub fn new(
        configs: &[TierConfig],
        factory: &dyn BackendFactory,
        metrics: Arc<ProxyMetrics>,
    ) -> GateResult<TierSet> {
        let mut ordered: Vec<&TierConfig> = configs.iter().collect();
        ordered.sort_by(|a, b| b.duration.cmp(&a.duration));

        let mut tiers: Vec<Arc<Tier>> = Vec::with_capacity(ordered.len());
        for config in ordered {
            match Tier::new(config, factory) {
                Ok(tier) => tiers.push(Arc::new(tier)),
                Err(err) => {
                    for tier in &tiers {
                        if let Err(close_err) = tier.close() {
                            warn!("error closing tier during cleanup: {}", close_err);
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(TierSet { tiers, metrics })
    }

    /// Retention durations in issue order (descending).
    pub fn retentions(&self) -> Vec<Duration> {
        self.tiers.iter().map(|t| t.retention()).collect()
    }

    /// One subquery per tier: the original query constrained to
    /// `[now - retention, now)`. Tiers whose window misses the query's own
    /// range get `None` and are skipped by the fan-out.
    fn split(&self, query: &Query, now: DateTime<Utc>) -> Vec<Option<Query>> {
        self.tiers
            .iter()
            .map(|tier| query.with_time_range(now - tier.retention, now))
            .collect()
    }

    pub async fn query(
        &self,
        query: &Query,
        epoch: &str,
        now: DateTime<Utc>,
    ) -> GateResult<Response> {
        let queries = self.split(query, now);
        let endpoints: Vec<Arc<dyn Subquery>> = self
            .tiers
            .iter()
            .map(|t| t.clone() as Arc<dyn Subquery>)
            .collect();
        run_merged(&endpoints, &queries, epoch, &self.metrics).await
    }

    pub fn close(&self) -> GateResult<()> {
        let mut result = Ok(());
        for tier in &self.tiers {
            if let Err(err) = tier.close() {
                result = Err(err);
            }
        }
        result
    }
}
