use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{SourceMetadata, Task};

/// Published to the results topic after a processor ran a task to
/// completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessOutcome {
    /// Always "completed"; kept explicit so downstream consumers can match
    /// on a single field across outcome kinds.
    pub status: String,
    pub task_id: String,
    /// Name of the processor that produced the result.
    pub processor: String,
    pub result: Value,
    pub timestamp: DateTime<Utc>,
    pub metadata: SourceMetadata,
}

impl SuccessOutcome {
    pub fn new(task: &Task, processor: &str, result: Value) -> Self {
        Self {
            status: "completed".to_string(),
            task_id: task.task_id.clone(),
            processor: processor.to_string(),
            result,
            timestamp: Utc::now(),
            metadata: task.source.clone(),
        }
    }
}

/// Published to the error topic whenever a record could not be decoded,
/// validated, processed, or published. Carries enough of the original to
/// support replay or manual inspection; no record fails silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureOutcome {
    pub error_type: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_metadata: Option<SourceMetadata>,
    /// Free-form extra context, e.g. the validated task data when the
    /// failure happened in the processing phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl FailureOutcome {
    pub fn new(error_type: &str, error_message: String) -> Self {
        Self {
            error_type: error_type.to_string(),
            error_message,
            original_message: None,
            message_metadata: None,
            context: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the raw record payload, replacing invalid UTF-8 rather than
    /// dropping the evidence.
    pub fn original_message(mut self, raw: &[u8]) -> Self {
        self.original_message = Some(String::from_utf8_lossy(raw).into_owned());
        self
    }

    pub fn metadata(mut self, metadata: SourceMetadata) -> Self {
        self.message_metadata = Some(metadata);
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}
