//! Aggregation servers
//!
//! An aggregation server answers aggregation queries over recent raw
//! samples. It comes in three shapes: a single direct endpoint, a set of
//! disjoint shards whose aggregates must be recomposed, or a plain group
//! of further aggregation servers.
//!
//! Recomposition exists because merging per-shard means is wrong: the
//! proxy instead asks every shard for the sum-decomposable components
//! (sum, count) and rebuilds the mean as `Σ sums / Σ counts`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use timegate_core::merge::{divide_rows, extract_rows, sum_rows};
use timegate_core::response::{Response, Row, StatementResult};
use timegate_core::{GateError, GateResult, Query, Statement};

use crate::backend::{Backend, BackendFactory};
use crate::config::{AggregatorConfig, AggregatorMode};
use crate::fanout::{run_merged, run_raw, Subquery};
use crate::metrics::ProxyMetrics;

/// The backend-side database name aggregation servers answer under.
const AGGREGATE_DB: &str = "aggregate";

/// One aggregation server in one of its three shapes.
pub enum Aggregator {
    Direct(Arc<dyn Backend>),
    Recomposed(ShardSet),
    Group(AggregatorSet),
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregator::Direct(_) => f.debug_tuple("Direct").field(&"<handle>").finish(),
            Aggregator::Recomposed(shards) => f.debug_tuple("Recomposed").field(shards).finish(),
            Aggregator::Group(group) => f.debug_tuple("Group").field(group).finish(),
        }
    }
}

impl Aggregator {
    pub fn new(
        config: &AggregatorConfig,
        factory: &dyn BackendFactory,
        metrics: Arc<ProxyMetrics>,
    ) -> GateResult<Aggregator> {
        match config.mode()? {
            AggregatorMode::Direct(endpoint) => Ok(Aggregator::Direct(factory.create(endpoint)?)),
            AggregatorMode::Sharded(members) => {
                Ok(Aggregator::Recomposed(ShardSet::new(members, factory, metrics)?))
            }
            AggregatorMode::Group(members) => {
                Ok(Aggregator::Group(AggregatorSet::new(members, factory, metrics)?))
            }
        }
    }

    pub async fn query(&self, query: &Query, epoch: &str) -> GateResult<Response> {
        match self {
            Aggregator::Direct(handle) => {
                handle
                    .execute(&query.to_string(), AGGREGATE_DB, epoch)
                    .await
            }
            Aggregator::Recomposed(shards) => shards.query(query, epoch).await,
            Aggregator::Group(group) => group.query(query, epoch).await,
        }
    }

    pub fn close(&self) -> GateResult<()> {
        match self {
            Aggregator::Direct(handle) => handle.close(),
            Aggregator::Recomposed(shards) => shards.close(),
            Aggregator::Group(group) => group.close(),
        }
    }
}

#[async_trait]
impl Subquery for Aggregator {
    async fn run(&self, query: &Query, epoch: &str) -> GateResult<Response> {
        self.query(query, epoch).await
    }
}

/// Build a list of aggregation servers, closing the ones already built
/// when a later sibling fails construction.
fn build_members(
    configs: &[AggregatorConfig],
    factory: &dyn BackendFactory,
    metrics: &Arc<ProxyMetrics>,
) -> GateResult<Vec<Arc<Aggregator>>> {
    let mut members: Vec<Arc<Aggregator>> = Vec::with_capacity(configs.len());
    for config in configs {
        match Aggregator::new(config, factory, metrics.clone()) {
            Ok(member) => members.push(Arc::new(member)),
            Err(err) => {
                for member in &members {
                    if let Err(close_err) = member.close() {
                        warn!("error closing aggregation server during cleanup: {}", close_err);
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(members)
}

fn close_members(members: &[Arc<Aggregator>]) -> GateResult<()> {
    let mut result = Ok(());
    for member in members {
        if let Err(err) = member.close() {
            result = Err(err);
        }
    }
    result
}

fn as_subqueries(members: &[Arc<Aggregator>]) -> Vec<Arc<dyn Subquery>> {
    members
        .iter()
        .map(|m| m.clone() as Arc<dyn Subquery>)
        .collect()
}

/// A plain group: the same query goes to every member and the answers
/// merge under the usual partial-failure policy.
#[derive(Debug)]
pub struct AggregatorSet {
    members: Vec<Arc<Aggregator>>,
    metrics: Arc<ProxyMetrics>,
}

impl AggregatorSet {
    pub fn new(
        configs: &[AggregatorConfig],
        factory: &dyn BackendFactory,
        metrics: Arc<ProxyMetrics>,
    ) -> GateResult<AggregatorSet> {
        Ok(AggregatorSet {
            members: build_members(configs, factory, &metrics)?,
            metrics,
        })
    }

    pub async fn query(&self, query: &Query, epoch: &str) -> GateResult<Response> {
        let endpoints = as_subqueries(&self.members);
        let queries: Vec<Option<Query>> = vec![Some(query.clone()); self.members.len()];
        run_merged(&endpoints, &queries, epoch, &self.metrics).await
    }

    pub fn close(&self) -> GateResult<()> {
        close_members(&self.members)
    }
}

/// Disjoint shards of one logical aggregation server. Unlike a plain
/// group, failure handling is strict: answering with a shard missing
/// would silently under-count, so any shard error fails the whole query.
#[derive(Debug)]
pub struct ShardSet {
    shards: Vec<Arc<Aggregator>>,
    metrics: Arc<ProxyMetrics>,
}

impl ShardSet {
    pub fn new(
        configs: &[AggregatorConfig],
        factory: &dyn BackendFactory,
        metrics: Arc<ProxyMetrics>,
    ) -> GateResult<ShardSet> {
        Ok(ShardSet {
            shards: build_members(configs, factory, &metrics)?,
            metrics,
        })
    }

    /// Broadcast one statement to every shard and sum the resulting rows.
    /// Any transport or response-level error aborts; every failed shard is
    /// still logged and counted before the first error propagates.
    async fn sum_across_shards(&self, statement: &Statement, epoch: &str) -> GateResult<Vec<Row>> {
        let query = Query::single(statement.clone());
        let endpoints = as_subqueries(&self.shards);
        let queries: Vec<Option<Query>> = vec![Some(query); self.shards.len()];
        let (responses, errors) = run_raw(&endpoints, &queries, epoch).await;

        let mut row_groups = Vec::with_capacity(self.shards.len());
        let mut first_error: Option<GateError> = None;
        for (response, error) in responses.into_iter().zip(errors) {
            let outcome = match error {
                Some(err) => Err(err),
                None => {
                    let Some(response) = response else {
                        unreachable!("live fan-out slot produced neither response nor error");
                    };
                    extract_rows(&response)
                }
            };
            match outcome {
                Ok(rows) => row_groups.push(rows),
                Err(err) => {
                    warn!("shard query failed: {}", err);
                    self.metrics.record_backend_failure();
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        sum_rows(&row_groups)
    }

    /// Recompose one statement's aggregate from shard-level components.
    async fn recompose_statement(
        &self,
        statement: &Statement,
        epoch: &str,
    ) -> GateResult<StatementResult> {
        let series = match statement.aggregation_type().as_deref() {
            Some("mean") => {
                let sum_stmt = statement.with_aggregation("sum")?;
                let count_stmt = statement.with_aggregation("count")?;
                let (sums, counts) = tokio::join!(
                    self.sum_across_shards(&sum_stmt, epoch),
                    self.sum_across_shards(&count_stmt, epoch)
                );
                divide_rows(&sums?, &counts?, &["time", "mean"])?
            }
            _ => self.sum_across_shards(statement, epoch).await?,
        };
        Ok(StatementResult {
            series,
            error: None,
        })
    }

    /// Answer a query by recomposing each statement in order.
    pub async fn query(&self, query: &Query, epoch: &str) -> GateResult<Response> {
        let mut results = Vec::with_capacity(query.statements().len());
        for statement in query.statements() {
            results.push(self.recompose_statement(statement, epoch).await?);
        }
        Ok(Response {
            results,
            error: None,
        })
    }

    pub fn close(&self) -> GateResult<()> {
        close_members(&self.shards)
    }
}
