pub const RECORDS_RECEIVED: &str = "task_records_received";
pub const TASKS_COMPLETED: &str = "tasks_completed";
pub const TASKS_FAILED: &str = "tasks_failed";
pub const VALIDATION_FAILURES: &str = "task_validation_failures";
pub const PUBLISH_FAILURES: &str = "outcome_publish_failures";
pub const COMMIT_FAILURES: &str = "offset_commit_failures";
pub const QUEUE_DEPTH: &str = "worker_queue_depth";
pub const PROCESSING_TIME: &str = "task_processing_duration_seconds";
