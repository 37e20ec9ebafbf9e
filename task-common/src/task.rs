use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Where a task came from: the broker coordinates of the record it was
/// decoded from. Attached by the intake stage when the record is pulled off
/// the broker and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Broker-assigned record timestamp, when the broker provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// When the intake loop received the record.
    pub received_at: DateTime<Utc>,
}

/// The unit of work: one decoded, validated task request. Lives in memory
/// for the duration of a single processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque identifier supplied by the sender, never generated here.
    pub task_id: String,
    /// The business content, the `data` field on the wire.
    pub payload: Map<String, Value>,
    /// Informational only, nothing in the pipelines depends on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    pub source: SourceMetadata,
}

impl Task {
    /// The request-shaped JSON this task was decoded from, minus the source
    /// metadata. Feeding this back through validation yields an equal task.
    pub fn to_request(&self) -> Value {
        let mut request = json!({
            "task_id": self.task_id,
            "data": self.payload,
        });
        if let Some(priority) = self.priority {
            request["priority"] = json!(priority);
        }
        request
    }
}
