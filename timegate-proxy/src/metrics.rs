//! Metrics collection and reporting for the proxy

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe metrics collector for the federation proxy
#[derive(Debug)]
pub struct ProxyMetrics {
    /// Total queries executed
    pub queries_total: AtomicU64,

    /// Total query errors
    pub query_errors_total: AtomicU64,

    /// Backend calls that failed (transport or response-level) during a
    /// fan-out
    pub backend_failures_total: AtomicU64,

    /// Total query execution time
    pub query_time_total_ms: AtomicU64,

    /// Configuration reloads applied
    pub reloads_total: AtomicU64,

    /// Service start time
    start_time: Instant,
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self {
            queries_total: AtomicU64::new(0),
            query_errors_total: AtomicU64::new(0),
            backend_failures_total: AtomicU64::new(0),
            query_time_total_ms: AtomicU64::new(0),
            reloads_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed query
    pub fn record_query(&self, duration: Duration, failed: bool) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.query_errors_total.fetch_add(1, Ordering::Relaxed);
        }
        self.query_time_total_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record one failed backend call inside a fan-out
    pub fn record_backend_failure(&self) {
        self.backend_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an applied configuration reload
    pub fn record_reload(&self) {
        self.reloads_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render the collected metrics in Prometheus text format
    pub fn render_prometheus(&self) -> String {
        let queries = self.queries_total.load(Ordering::Relaxed);
        let errors = self.query_errors_total.load(Ordering::Relaxed);
        let backend_failures = self.backend_failures_total.load(Ordering::Relaxed);
        let time_ms = self.query_time_total_ms.load(Ordering::Relaxed);
        let reloads = self.reloads_total.load(Ordering::Relaxed);
        let avg_ms = if queries > 0 {
            time_ms as f64 / queries as f64
        } else {
            0.0
        };

        format!(
            "# HELP timegate_queries_total Total number of queries executed\n\
             # TYPE timegate_queries_total counter\n\
             timegate_queries_total {}\n\
             # HELP timegate_query_errors_total Total number of query errors\n\
             # TYPE timegate_query_errors_total counter\n\
             timegate_query_errors_total {}\n\
             # HELP timegate_backend_failures_total Backend calls that failed during fan-out\n\
             # TYPE timegate_backend_failures_total counter\n\
             timegate_backend_failures_total {}\n\
             # HELP timegate_query_time_total_ms Total query execution time in milliseconds\n\
             # TYPE timegate_query_time_total_ms counter\n\
             timegate_query_time_total_ms {}\n\
             # HELP timegate_avg_query_time_ms Average query execution time in milliseconds\n\
             # TYPE timegate_avg_query_time_ms gauge\n\
             timegate_avg_query_time_ms {:.3}\n\
             # HELP timegate_reloads_total Configuration reloads applied\n\
             # TYPE timegate_reloads_total counter\n\
             timegate_reloads_total {}\n\
             # HELP timegate_uptime_seconds Service uptime in seconds\n\
             # TYPE timegate_uptime_seconds gauge\n\
             timegate_uptime_seconds {}\n",
            queries,
            errors,
            backend_failures,
            time_ms,
            avg_ms,
            reloads,
            self.uptime_seconds()
        )
    }
}
