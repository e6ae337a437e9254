//! Execution audit records

use crate::types::DocumentEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Status of one executor run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Started,
    Success,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Started => write!(f, "started"),
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Audit record of one run of an instance
///
/// Created with status `started` before anything else happens and completed
/// exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub instance: Uuid,

    /// Identifier of the target document, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,

    pub status: ExecutionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<DocumentEvent>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Snapshot of the inputs
    pub input: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionLog {
    /// Start a new log for `instance`
    pub fn start(instance: Uuid, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance,
            document: None,
            status: ExecutionStatus::Started,
            event: None,
            started_at: Utc::now(),
            completed_at: None,
            input,
            output: None,
            error: None,
        }
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    pub fn with_event(mut self, event: DocumentEvent) -> Self {
        self.event = Some(event);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status != ExecutionStatus::Started
    }

    /// Duration of a completed run in milliseconds
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds())
    }
}

/// The single completing update applied to a started log
#[derive(Debug, Clone, PartialEq)]
pub struct LogCompletion {
    pub status: ExecutionStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl LogCompletion {
    pub fn success(output: Value) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Failed completion that still carries an output snapshot
    pub fn failure_with_output(error: impl Into<String>, output: Value) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            output: Some(output),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_log() {
        let instance = Uuid::new_v4();
        let log = ExecutionLog::start(instance, json!({"config": {}}))
            .with_document("doc-1")
            .with_event(DocumentEvent::Approved);

        assert_eq!(log.status, ExecutionStatus::Started);
        assert!(!log.is_completed());
        assert_eq!(log.document.as_deref(), Some("doc-1"));
        assert!(log.duration_ms().is_none());
    }

    #[test]
    fn test_completion_constructors() {
        assert_eq!(LogCompletion::success(json!(1)).status, ExecutionStatus::Success);
        let failed = LogCompletion::failure("boom");
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}
