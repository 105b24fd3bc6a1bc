//! Error types for timegate operations

use thiserror::Error;

/// Result type for timegate operations
pub type GateResult<T> = Result<T, GateError>;

/// Error types shared by the core library and the proxy service
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Time range error: {0}")]
    TimeRange(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No such database: {0}")]
    NoSuchDatabase(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Response error: {0}")]
    ResponseError(String),

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GateError {
    /// True for errors originating at a backend rather than in this process.
    pub fn is_backend(&self) -> bool {
        matches!(self, GateError::Backend(_) | GateError::ResponseError(_))
    }
}
