//! Backend handles
//!
//! A backend is anything that answers the query wire protocol: a primary
//! store tier or an aggregation server. The factory seam lets tests swap
//! in recording fakes for the HTTP client.

use async_trait::async_trait;
use std::sync::Arc;

use timegate_core::{GateError, GateResult, Response};

/// Uniform handle over one backend endpoint.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run a rendered query against `database`, with `epoch` controlling
    /// timestamp encoding in the response.
    async fn execute(&self, query: &str, database: &str, epoch: &str) -> GateResult<Response>;

    /// Release any resources held by this handle.
    fn close(&self) -> GateResult<()>;
}

/// Creates backend handles from configured endpoints.
pub trait BackendFactory: Send + Sync {
    fn create(&self, endpoint: &str) -> GateResult<Arc<dyn Backend>>;
}

/// HTTP backend speaking the `/query` wire protocol.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl Backend for HttpBackend {
    async fn execute(&self, query: &str, database: &str, epoch: &str) -> GateResult<Response> {
        let url = format!("{}/query", self.base_url);
        let request = self
            .client
            .get(&url)
            .query(&[("db", database), ("q", query), ("epoch", epoch)]);
        let response = request
            .send()
            .await
            .map_err(|e| GateError::Backend(format!("{}: {}", self.base_url, e)))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| GateError::Backend(format!("{}: {}", self.base_url, e)))?;
        if !status.is_success() && !status.is_client_error() {
            return Err(GateError::Backend(format!(
                "{}: http status {}",
                self.base_url, status
            )));
        }
        // 4xx responses still carry a JSON envelope with an error field;
        // decoding it preserves the response-level-error distinction.
        serde_json::from_slice(&body)
            .map_err(|e| GateError::Backend(format!("{}: bad response body: {}", self.base_url, e)))
    }

    fn close(&self) -> GateResult<()> {
        // Dropping the handle releases its share of the connection pool.
        Ok(())
    }
}

/// Factory producing [`HttpBackend`] handles that share one client (and
/// therefore one connection pool).
pub struct HttpBackendFactory {
    client: reqwest::Client,
}

impl HttpBackendFactory {
    pub fn new() -> HttpBackendFactory {
        HttpBackendFactory {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpBackendFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendFactory for HttpBackendFactory {
    fn create(&self, endpoint: &str) -> GateResult<Arc<dyn Backend>> {
        let url = reqwest::Url::parse(endpoint)
            .map_err(|e| GateError::Config(format!("bad endpoint '{}': {}", endpoint, e)))?;
        Ok(Arc::new(HttpBackend {
            client: self.client.clone(),
            base_url: url.as_str().trim_end_matches('/').to_string(),
        }))
    }
}
