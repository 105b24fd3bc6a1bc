//! Recording mock backend for tests
//!
//! Mirrors the factory seam: a `MockStore` hands out pre-registered
//! handles by endpoint name, each of which records every call and answers
//! with a canned response or error.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use timegate_core::{GateError, GateResult, Response};

use crate::backend::{Backend, BackendFactory};

/// One recorded `execute` call.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCall {
    pub query: String,
    pub database: String,
    pub epoch: String,
}

/// A backend double that records calls and replays a canned answer.
#[derive(Default)]
pub struct MockBackend {
    calls: Mutex<Vec<QueryCall>>,
    response: Mutex<Option<Response>>,
    error: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Arc<MockBackend> {
        Arc::new(MockBackend::default())
    }

    /// Answer every query with `response` from now on.
    pub fn respond_with(&self, response: Response) {
        *self.response.lock() = Some(response);
        *self.error.lock() = None;
    }

    /// Fail every query with a transport error from now on.
    pub fn fail_with(&self, message: &str) {
        *self.error.lock() = Some(message.to_string());
    }

    /// Calls recorded so far, oldest first.
    pub fn calls(&self) -> Vec<QueryCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn execute(&self, query: &str, database: &str, epoch: &str) -> GateResult<Response> {
        assert!(!self.closed(), "query sent to a closed backend handle");
        self.calls.lock().push(QueryCall {
            query: query.to_string(),
            database: database.to_string(),
            epoch: epoch.to_string(),
        });
        if let Some(message) = self.error.lock().clone() {
            return Err(GateError::Backend(message));
        }
        Ok(self.response.lock().clone().unwrap_or_default())
    }

    fn close(&self) -> GateResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory over a fixed set of named mock backends. Unknown endpoints fail
/// creation, which exercises the partial-construction cleanup paths.
#[derive(Default)]
pub struct MockStore {
    handles: HashMap<String, Arc<MockBackend>>,
}

impl MockStore {
    pub fn new() -> MockStore {
        MockStore::default()
    }

    /// Register a backend under `endpoint` and return its handle.
    pub fn add(&mut self, endpoint: &str) -> Arc<MockBackend> {
        let handle = MockBackend::new();
        self.handles.insert(endpoint.to_string(), handle.clone());
        handle
    }

    pub fn get(&self, endpoint: &str) -> Arc<MockBackend> {
        self.handles
            .get(endpoint)
            .unwrap_or_else(|| panic!("no mock backend registered for '{}'", endpoint))
            .clone()
    }

    pub fn all_closed(&self) -> bool {
        self.handles.values().all(|h| h.closed())
    }
}

impl BackendFactory for MockStore {
    fn create(&self, endpoint: &str) -> GateResult<Arc<dyn Backend>> {
        match self.handles.get(endpoint) {
            Some(handle) => Ok(handle.clone()),
            None => Err(GateError::Config(format!(
                "no backend available at '{}'",
                endpoint
            ))),
        }
    }
}
