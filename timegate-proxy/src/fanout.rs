//! Concurrent fan-out over a set of backends
//!
//! Every non-skipped slot runs concurrently and writes its outcome into a
//! pre-indexed slot, so the merge order is always the endpoint order
//! regardless of completion order.

use futures::future::join_all;
use tracing::warn;

use async_trait::async_trait;
use std::sync::Arc;

use timegate_core::merge::merge;
use timegate_core::{GateError, GateResult, Query, Response};

use crate::metrics::ProxyMetrics;

/// Anything that can answer one subquery: a tier handle or an aggregation
/// server.
#[async_trait]
pub trait Subquery: Send + Sync {
    async fn run(&self, query: &Query, epoch: &str) -> GateResult<Response>;
}

/// Run every non-`None` subquery concurrently, returning raw per-slot
/// outcomes without applying any failure policy. Slot `i` of the output
/// corresponds to `endpoints[i]`.
///
/// The two slices must have the same length; a mismatch is a programming
/// bug and aborts.
pub async fn run_raw(
    endpoints: &[Arc<dyn Subquery>],
    queries: &[Option<Query>],
    epoch: &str,
) -> (Vec<Option<Response>>, Vec<Option<GateError>>) {
    assert_eq!(
        endpoints.len(),
        queries.len(),
        "endpoints and queries must have the same length"
    );

    let futures = queries.iter().enumerate().filter_map(|(i, query)| {
        query.as_ref().map(|query| {
            let endpoint = endpoints[i].clone();
            async move { (i, endpoint.run(query, epoch).await) }
        })
    });

    let mut responses: Vec<Option<Response>> = vec![None; queries.len()];
    let mut errors: Vec<Option<GateError>> = std::iter::repeat_with(|| None)
        .take(queries.len())
        .collect();
    for (i, outcome) in join_all(futures).await {
        match outcome {
            Ok(response) => responses[i] = Some(response),
            Err(err) => errors[i] = Some(err),
        }
    }
    (responses, errors)
}

/// Fan out and merge with partial-failure tolerance.
///
/// A slot counts as failed when the transport erred or the response
/// carries a response-level error. Failures are counted, logged, and
/// dropped as long as at least one sibling succeeded; when every slot
/// failed, the last observed failure is returned. With no live slots at
/// all the result is the well-formed empty response.
pub async fn run_merged(
    endpoints: &[Arc<dyn Subquery>],
    queries: &[Option<Query>],
    epoch: &str,
    metrics: &ProxyMetrics,
) -> GateResult<Response> {
    let (mut responses, mut errors) = run_raw(endpoints, queries, epoch).await;

    let mut to_merge = Vec::new();
    let mut last_error: Option<GateError> = None;
    for (i, query) in queries.iter().enumerate() {
        if query.is_none() {
            continue;
        }
        let response = responses[i].take();
        let failure = match errors[i].take() {
            Some(err) => Some(err),
            None => response
                .as_ref()
                .and_then(|r| r.error_message())
                .map(|m| GateError::ResponseError(m.to_string())),
        };
        match failure {
            Some(err) => {
                warn!("backend query failed: {}", err);
                metrics.record_backend_failure();
                last_error = Some(err);
            }
            None => {
                if let Some(response) = response {
                    to_merge.push(response);
                }
            }
        }
    }

    if to_merge.is_empty() {
        if let Some(err) = last_error {
            return Err(err);
        }
    }
    merge(&to_merge)
}
