//! One logical database
//!
//! Composes the retention-tiered primaries and the aggregation servers
//! configured under a single name. Both arms run concurrently; when both
//! answer, primary-side points win on conflicts because the tiers hold
//! the authoritative history.

use chrono::{DateTime, Utc};
use tracing::warn;

use timegate_core::merge::merge_preferred;
use timegate_core::{GateResult, Query, Response};

use crate::aggregate::AggregatorSet;
use crate::backend::BackendFactory;
use crate::config::DatabaseConfig;
use crate::metrics::ProxyMetrics;
use crate::tiers::TierSet;

use std::sync::Arc;

#[derive(Debug)]
pub struct Database {
    name: String,
    tiers: Option<TierSet>,
    aggregators: Option<AggregatorSet>,
}

impl Database {
    pub fn new(
        config: &DatabaseConfig,
        factory: &dyn BackendFactory,
        metrics: Arc<ProxyMetrics>,
    ) -> GateResult<Database> {
        let tiers = if config.primaries.is_empty() {
            None
        } else {
            Some(TierSet::new(&config.primaries, factory, metrics.clone())?)
        };
        let aggregators = if config.aggregators.is_empty() {
            None
        } else {
            match AggregatorSet::new(&config.aggregators, factory, metrics) {
                Ok(set) => Some(set),
                Err(err) => {
                    if let Some(tiers) = &tiers {
                        if let Err(close_err) = tiers.close() {
                            warn!("error closing tiers during cleanup: {}", close_err);
                        }
                    }
                    return Err(err);
                }
            }
        };
        Ok(Database {
            name: config.name.clone(),
            tiers,
            aggregators,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run a query against both arms. One failing arm (transport error or
    /// response-level error) yields the other arm's answer; two healthy
    /// answers merge with primary-side precedence.
    pub async fn query(
        &self,
        query: &Query,
        epoch: &str,
        now: DateTime<Utc>,
    ) -> GateResult<Response> {
        match (&self.tiers, &self.aggregators) {
            (None, None) => Ok(Response::empty()),
            (Some(tiers), None) => tiers.query(query, epoch, now).await,
            (None, Some(aggregators)) => aggregators.query(query, epoch).await,
            (Some(tiers), Some(aggregators)) => {
                let (tier_result, agg_result) = tokio::join!(
                    tiers.query(query, epoch, now),
                    aggregators.query(query, epoch)
                );
                let agg_healthy =
                    matches!(&agg_result, Ok(r) if r.error_message().is_none());
                if !agg_healthy {
                    return tier_result;
                }
                let tier_healthy =
                    matches!(&tier_result, Ok(r) if r.error_message().is_none());
                if !tier_healthy {
                    return agg_result;
                }
                match (tier_result, agg_result) {
                    (Ok(tier_response), Ok(agg_response)) => {
                        merge_preferred(&tier_response, &agg_response)
                    }
                    _ => unreachable!("both arms were healthy"),
                }
            }
        }
    }

    pub fn close(&self) -> GateResult<()> {
        let mut result = Ok(());
        if let Some(tiers) = &self.tiers {
            if let Err(err) = tiers.close() {
                result = Err(err);
            }
        }
        if let Some(aggregators) = &self.aggregators {
            if let Err(err) = aggregators.close() {
                result = Err(err);
            }
        }
        result
    }
}
