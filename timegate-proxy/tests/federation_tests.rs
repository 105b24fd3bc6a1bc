//! End-to-end federation tests
//!
//! Build the full registry from a realistic configuration with recording
//! mock backends, then drive queries through it and check both the merged
//! answers and the exact subqueries each backend received.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use timegate_core::response::{Response, Row, StatementResult};
use timegate_core::Query;
use timegate_proxy::config::ProxyConfig;
use timegate_proxy::mock_backend::{MockBackend, MockStore};
use timegate_proxy::{FederationEngine, ProxyMetrics, Registry};

const CONFIG: &str = r#"
databases:
  - name: tiered
    influxes:
      - hostAndPort: charlie
        duration: 1h
        database: c
      - hostAndPort: alpha
        duration: 100h
        database: a
      - hostAndPort: bravo
        duration: 10h
        database: b
  - name: sharded
    scotties:
      - hostAndPort: delta
      - hostAndPort: echo
      - hostAndPort: foxtrot
  - name: nothing
  - name: both
    influxes:
      - hostAndPort: alpha
        duration: 100h
        database: a
    scotties:
      - hostAndPort: delta
  - name: recomposed
    scotties:
      - partials:
          - hostAndPort: golf
          - hostAndPort: hotel
          - hostAndPort: india
"#;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 12, 1, 0, 1, 0).unwrap()
}

fn response(values: &[(i64, i64)]) -> Response {
    Response {
        results: vec![StatementResult {
            series: vec![Row {
                name: "dual".to_string(),
                tags: BTreeMap::new(),
                columns: vec!["time".to_string(), "value".to_string()],
                values: values
                    .iter()
                    .map(|&(t, v)| vec![json!(t), json!(v)])
                    .collect(),
            }],
            error: None,
        }],
        error: None,
    }
}

/// Backends named after the seed scenarios, each with a canned answer.
fn build_store() -> MockStore {
    let mut store = MockStore::new();
    store.add("alpha").respond_with(response(&[(1000, 10), (1200, 11)]));
    store.add("bravo").respond_with(response(&[(1200, 12), (1400, 13)]));
    store
        .add("charlie")
        .respond_with(response(&[(1400, 14), (1600, 15)]));
    store.add("delta").respond_with(response(&[(1400, 24), (1600, 25)]));
    store.add("echo").respond_with(response(&[(1600, 26), (1800, 27)]));
    store
        .add("foxtrot")
        .respond_with(response(&[(1800, 28), (2000, 29)]));
    store.add("golf").respond_with(response(&[(1000, 4)]));
    store.add("hotel").respond_with(response(&[(1000, 6)]));
    store.add("india").respond_with(response(&[(1000, 10)]));
    store
}

fn build_registry(store: &MockStore) -> Registry {
    build_registry_with_metrics(store, Arc::new(ProxyMetrics::new()))
}

fn build_registry_with_metrics(store: &MockStore, metrics: Arc<ProxyMetrics>) -> Registry {
    let config = ProxyConfig::from_yaml(CONFIG).unwrap();
    Registry::new(&config, store, metrics).unwrap()
}

fn parse(text: &str) -> Query {
    Query::parse(text, now()).unwrap()
}

fn single_call(backend: &Arc<MockBackend>) -> (String, String, String) {
    let calls = backend.calls();
    assert_eq!(calls.len(), 1, "expected exactly one call");
    (
        calls[0].query.clone(),
        calls[0].database.clone(),
        calls[0].epoch.clone(),
    )
}

#[tokio::test]
async fn test_tiered_fanout_merges_finest_data_first() {
    let store = build_store();
    let registry = build_registry(&store);
    let db = registry.get("tiered").unwrap();

    let query = parse("select mean(value) from dual where time >= now() - 5h");
    let merged = db.query(&query, "ns", now()).await.unwrap();
    assert_eq!(
        merged,
        response(&[(1000, 10), (1200, 12), (1400, 14), (1600, 15)])
    );

    // Long-retention tiers are offered the whole remaining window.
    let (q, database, epoch) = single_call(&store.get("alpha"));
    assert_eq!(
        q,
        "SELECT mean(value) FROM dual WHERE time >= '2016-11-30T19:01:00Z' AND time < '2016-12-01T00:01:00Z'"
    );
    assert_eq!(database, "a");
    assert_eq!(epoch, "ns");

    let (q, database, _) = single_call(&store.get("bravo"));
    assert_eq!(
        q,
        "SELECT mean(value) FROM dual WHERE time >= '2016-11-30T19:01:00Z' AND time < '2016-12-01T00:01:00Z'"
    );
    assert_eq!(database, "b");

    // The finest tier only holds the last hour.
    let (q, database, _) = single_call(&store.get("charlie"));
    assert_eq!(
        q,
        "SELECT mean(value) FROM dual WHERE time >= '2016-11-30T23:01:00Z' AND time < '2016-12-01T00:01:00Z'"
    );
    assert_eq!(database, "c");
}

#[tokio::test]
async fn test_tiered_fanout_with_bounded_right_edge() {
    let store = build_store();
    let registry = build_registry(&store);
    let db = registry.get("tiered").unwrap();

    let query = parse("select mean(value) from dual where time >= now() - 120h and time < now() - 5h");
    let merged = db.query(&query, "ns", now()).await.unwrap();
    assert_eq!(merged, response(&[(1000, 10), (1200, 12), (1400, 13)]));

    let (q, _, _) = single_call(&store.get("alpha"));
    assert_eq!(
        q,
        "SELECT mean(value) FROM dual WHERE time >= '2016-11-26T20:01:00Z' AND time < '2016-11-30T19:01:00Z'"
    );
    let (q, _, _) = single_call(&store.get("bravo"));
    assert_eq!(
        q,
        "SELECT mean(value) FROM dual WHERE time >= '2016-11-30T14:01:00Z' AND time < '2016-11-30T19:01:00Z'"
    );
    // Charlie's one-hour window lies entirely past the query's right edge.
    assert_eq!(store.get("charlie").call_count(), 0);
}

#[tokio::test]
async fn test_tiered_fanout_tolerates_one_backend_down() {
    let store = build_store();
    store.get("charlie").fail_with("connection refused");
    let metrics = Arc::new(ProxyMetrics::new());
    let registry = build_registry_with_metrics(&store, metrics.clone());
    let db = registry.get("tiered").unwrap();

    let query = parse("select mean(value) from dual where time >= now() - 5h");
    let merged = db.query(&query, "ns", now()).await.unwrap();
    // Charlie's finer points are gone; bravo's coarser data fills in.
    assert_eq!(merged, response(&[(1000, 10), (1200, 12), (1400, 13)]));
    // The dropped backend still shows up in the failure counter.
    assert_eq!(
        metrics.backend_failures_total.load(Ordering::Relaxed),
        1
    );
}

#[tokio::test]
async fn test_tiered_fanout_all_backends_down() {
    let store = build_store();
    for name in ["alpha", "bravo", "charlie"] {
        store.get(name).fail_with("connection refused");
    }
    let registry = build_registry(&store);
    let db = registry.get("tiered").unwrap();

    let query = parse("select mean(value) from dual where time >= now() - 5h");
    assert!(db.query(&query, "ns", now()).await.is_err());
}

#[tokio::test]
async fn test_shard_group_broadcasts_identical_statement() {
    let store = build_store();
    let registry = build_registry(&store);
    let db = registry.get("sharded").unwrap();

    let query = parse("select mean(value) from dual where time >= now() - 5h");
    let merged = db.query(&query, "ms", now()).await.unwrap();
    assert_eq!(
        merged,
        response(&[(1400, 24), (1600, 26), (1800, 28), (2000, 29)])
    );

    for name in ["delta", "echo", "foxtrot"] {
        let (q, database, epoch) = single_call(&store.get(name));
        assert_eq!(
            q,
            "SELECT mean(value) FROM dual WHERE time >= '2016-11-30T19:01:00Z'"
        );
        assert_eq!(database, "aggregate");
        assert_eq!(epoch, "ms");
    }
}

#[tokio::test]
async fn test_mean_recomposition_across_shards() {
    let store = build_store();
    let registry = build_registry(&store);
    let db = registry.get("recomposed").unwrap();

    let query = parse("select mean(value) from dual where time >= now() - 5h");
    let result = db.query(&query, "ms", now()).await.unwrap();

    // Every shard saw exactly two broadcasts: the sum and count rewrites.
    for name in ["golf", "hotel", "india"] {
        let queries: Vec<String> = store
            .get(name)
            .calls()
            .iter()
            .map(|c| c.query.clone())
            .collect();
        assert_eq!(queries.len(), 2);
        assert!(queries.contains(
            &"SELECT sum(value) FROM dual WHERE time >= '2016-11-30T19:01:00Z'".to_string()
        ));
        assert!(queries.contains(
            &"SELECT count(value) FROM dual WHERE time >= '2016-11-30T19:01:00Z'".to_string()
        ));
    }

    // Both rewrites answered 4+6+10=20, so the recomposed mean is 1.
    assert_eq!(result.results.len(), 1);
    let row = &result.results[0].series[0];
    assert_eq!(row.columns, vec!["time", "mean"]);
    assert_eq!(row.values, vec![vec![json!(1000), json!(1)]]);
}

#[tokio::test]
async fn test_mean_recomposition_fails_on_any_shard_error() {
    let store = build_store();
    store.get("hotel").fail_with("shard down");
    let registry = build_registry(&store);
    let db = registry.get("recomposed").unwrap();

    let query = parse("select mean(value) from dual where time >= now() - 5h");
    assert!(db.query(&query, "ms", now()).await.is_err());
}

#[tokio::test]
async fn test_empty_database_contacts_no_backends() {
    let store = build_store();
    let registry = build_registry(&store);
    let db = registry.get("nothing").unwrap();

    let query = parse("select mean(value) from dual where time >= now() - 5h");
    let merged = db.query(&query, "ns", now()).await.unwrap();
    assert_eq!(merged, Response::empty());

    for name in [
        "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india",
    ] {
        assert_eq!(store.get(name).call_count(), 0, "{} was contacted", name);
    }
}

#[tokio::test]
async fn test_both_arms_merge_with_primary_precedence() {
    let store = build_store();
    let registry = build_registry(&store);
    let db = registry.get("both").unwrap();

    let query = parse("select mean(value) from dual where time >= now() - 5h");
    let merged = db.query(&query, "ns", now()).await.unwrap();
    // Alpha answers (1000,10),(1200,11); delta answers (1400,24),(1600,25).
    // No timestamps collide here, so the union carries both sides.
    assert_eq!(
        merged,
        response(&[(1000, 10), (1200, 11), (1400, 24), (1600, 25)])
    );
}

#[tokio::test]
async fn test_both_arms_primary_wins_on_conflict() {
    let store = build_store();
    store
        .get("delta")
        .respond_with(response(&[(1000, 99), (1800, 28)]));
    let registry = build_registry(&store);
    let db = registry.get("both").unwrap();

    let query = parse("select mean(value) from dual where time >= now() - 5h");
    let merged = db.query(&query, "ns", now()).await.unwrap();
    // The primary's value at 1000 overrides the aggregation server's.
    assert_eq!(merged, response(&[(1000, 10), (1200, 11), (1800, 28)]));
}

#[test]
fn test_names_are_sorted() {
    let store = build_store();
    let registry = build_registry(&store);
    assert_eq!(
        registry.names(),
        vec!["both", "nothing", "recomposed", "sharded", "tiered"]
    );
}

#[test]
fn test_close_releases_every_handle() {
    let store = build_store();
    let registry = build_registry(&store);
    registry.close().unwrap();
    assert!(store.all_closed());
}

#[tokio::test]
async fn test_engine_swap_under_load() {
    let store = build_store();
    let registry = build_registry(&store);
    let metrics = Arc::new(ProxyMetrics::new());
    let engine = FederationEngine::with_registry(registry, metrics);

    // A query is "in flight": its lease is held across the swap.
    let lease = engine.acquire();

    let replacement_store = build_store();
    engine.install(build_registry(&replacement_store));

    // The old registry still serves the outstanding lease.
    assert!(!store.all_closed());
    assert!(lease.get("tiered").is_some());

    drop(lease);
    assert!(store.all_closed());

    // The replacement is live for subsequent queries.
    let merged = engine
        .query(
            "select mean(value) from dual where time >= now() - 5h",
            "sharded",
            "ms",
        )
        .await
        .unwrap();
    assert_eq!(merged.results.len(), 1);
}

#[tokio::test]
async fn test_engine_rejects_unknown_database() {
    let store = build_store();
    let registry = build_registry(&store);
    let metrics = Arc::new(ProxyMetrics::new());
    let engine = FederationEngine::with_registry(registry, metrics);

    assert!(engine
        .query("select value from dual", "missing", "ns")
        .await
        .is_err());
}
