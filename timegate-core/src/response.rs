//! Response envelope shared with the backends
//!
//! Mirrors the JSON wire format the backends speak: a response holds one
//! result per statement, each result holds series rows. Errors can ride
//! inside the envelope ("response-level errors") and are distinct from
//! transport failures.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One series of points: name, tag set, column names, and value tuples
/// (one per point, first column conventionally `time`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Row {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Vec<Value>>,
}

impl Row {
    /// Identity a row merges under: series name plus tag set.
    pub fn key(&self) -> (String, BTreeMap<String, String>) {
        (self.name.clone(), self.tags.clone())
    }
}

/// The result of one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatementResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<Row>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A complete backend response: one result per statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<StatementResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// An empty but well-formed response.
    pub fn empty() -> Response {
        Response::default()
    }

    /// The response-level error, if any: the envelope error or the first
    /// statement-level error.
    pub fn error_message(&self) -> Option<&str> {
        if let Some(err) = &self.error {
            return Some(err);
        }
        self.results
            .iter()
            .find_map(|r| r.error.as_deref())
    }
}
