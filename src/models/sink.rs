//! Batch sink request and report types.

use serde::{Deserialize, Serialize};

pub const DEFAULT_SINK_CONTENT_TYPE: &str = "application/json";

/// One entry of a `/sink/{bucket}` batch.
#[derive(Deserialize, Clone, Debug)]
pub struct SinkOperation {
    /// Target object name.
    pub filename: String,

    /// Payload, stored as its JSON serialization.
    #[serde(default)]
    pub data: serde_json::Value,

    #[serde(default)]
    pub content_type: Option<String>,

    /// Delete instead of upsert.
    #[serde(rename = "_deleted", alias = "deleted", default)]
    pub deleted: bool,
}

impl SinkOperation {
    pub fn content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or(DEFAULT_SINK_CONTENT_TYPE)
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SinkStatus {
    Written,
    Deleted,
    /// Delete of an object that did not exist.
    AlreadyAbsent,
    /// The operation itself was invalid, e.g. an empty filename.
    Rejected,
    Failed,
}

/// Per-operation result, in batch order.
#[derive(Serialize, Clone, Debug)]
pub struct SinkOutcome {
    pub filename: String,
    pub status: SinkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SinkOutcome {
    pub fn ok(filename: &str, status: SinkStatus) -> Self {
        Self {
            filename: filename.to_string(),
            status,
            error: None,
        }
    }

    pub fn failed(filename: &str, error: impl ToString) -> Self {
        Self {
            filename: filename.to_string(),
            status: SinkStatus::Failed,
            error: Some(error.to_string()),
        }
    }

    pub fn rejected(filename: &str, error: impl ToString) -> Self {
        Self {
            status: SinkStatus::Rejected,
            ..Self::failed(filename, error)
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, SinkStatus::Failed | SinkStatus::Rejected)
    }
}
