//! # Timegate Core Library
//!
//! Shared library for the timegate federation proxy, providing the query
//! model, the response model, and the response-merge arithmetic used to
//! combine answers from heterogeneous time-series backends.
//!
//! ## Features
//!
//! - **Query model**: a small SELECT dialect with time-range and
//!   aggregation-function rewrites, parsed against a fixed `now`
//! - **Response model**: the JSON result envelope spoken by the backends
//! - **Merge**: row union, preferred merge, per-shard summation, and
//!   aligned division for aggregate recomposition
//! - **Time**: duration-string parsing and timestamp rendering

pub mod error;
pub mod merge;
pub mod query;
pub mod response;
pub mod time;

// Re-export commonly used types
pub use error::{GateError, GateResult};
pub use query::{Query, Statement};
pub use response::{Response, Row, StatementResult};
pub use time::{format_timestamp, parse_duration};

/// Version information for timegate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
