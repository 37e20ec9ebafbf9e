use chrono::Utc;
use common_kafka::kafka_consumer::{CommitHandle, DeliveredRecord};
use task_common::outcome::FailureOutcome;
use task_common::processor::TaskProcessor;
use task_common::task::{SourceMetadata, Task};
use task_common::validation::ValidationError;
use tracing::{error, warn};

pub mod config;
pub mod error;
pub mod metrics_consts;
pub mod pool;
pub mod publisher;
pub mod sequential;
#[cfg(test)]
pub mod test_utils;

use metrics_consts::{
    COMMIT_FAILURES, PROCESSING_TIME, PUBLISH_FAILURES, TASKS_COMPLETED, TASKS_FAILED,
    VALIDATION_FAILURES,
};
use publisher::ResultPublisher;

/// Source metadata for a record, stamped with the receipt time. Attached at
/// intake and carried unmodified through the rest of the pipeline.
pub(crate) fn source_metadata(record: &DeliveredRecord) -> SourceMetadata {
    SourceMetadata {
        topic: record.topic.clone(),
        partition: record.partition,
        offset: record.offset,
        timestamp: record.timestamp,
        received_at: Utc::now(),
    }
}

/// A commit failure only means the record will be redelivered after a
/// restart; under at-least-once that is survivable, so it never stops the
/// pipeline.
pub(crate) fn commit_record(commit: CommitHandle) {
    if let Err(commit_error) = commit.commit() {
        warn!("failed to commit offset: {}", commit_error);
        metrics::counter!(COMMIT_FAILURES).increment(1);
    }
}

/// Emit a failure outcome, then advance past the record. Publish errors are
/// logged and counted; the offset is committed regardless.
pub(crate) async fn publish_failure_and_commit(
    publisher: &ResultPublisher,
    failure: FailureOutcome,
    commit: CommitHandle,
) {
    if let Err(publish_error) = publisher.publish_failure(&failure).await {
        error!(
            "failed to publish {} outcome: {}",
            failure.error_type, publish_error
        );
        metrics::counter!(PUBLISH_FAILURES).increment(1);
    }
    commit_record(commit);
}

/// Publish a failure outcome for a record that did not validate, and commit
/// so a bad message never blocks the stream.
pub(crate) async fn reject_record(
    publisher: &ResultPublisher,
    validation_error: &ValidationError,
    payload: &[u8],
    source: SourceMetadata,
    commit: CommitHandle,
) {
    warn!(
        "failed to validate record at {}:{} offset {}: {}",
        source.topic, source.partition, source.offset, validation_error
    );
    metrics::counter!(VALIDATION_FAILURES).increment(1);

    let failure = FailureOutcome::new(validation_error.error_type(), validation_error.to_string())
        .original_message(payload)
        .metadata(source);
    publish_failure_and_commit(publisher, failure, commit).await;
}

/// Run one validated task to its outcome: process, publish, commit. Both
/// pipeline variants funnel through here, so the publish-then-commit
/// invariant lives in exactly one place.
pub(crate) async fn run_task(
    publisher: &ResultPublisher,
    processor: &dyn TaskProcessor,
    task: Task,
    raw: Vec<u8>,
    commit: CommitHandle,
) {
    let started = tokio::time::Instant::now();
    match processor.process(&task).await {
        Ok(result) => {
            metrics::histogram!(PROCESSING_TIME).record(started.elapsed().as_secs_f64());
            metrics::counter!(TASKS_COMPLETED).increment(1);
            if let Err(publish_error) = publisher
                .publish_success(&task, processor.name(), result)
                .await
            {
                error!(
                    "failed to publish result for task {}: {}",
                    task.task_id, publish_error
                );
                metrics::counter!(PUBLISH_FAILURES).increment(1);
            }
            commit_record(commit);
        }
        Err(processing_error) => {
            warn!("task {} failed: {}", task.task_id, processing_error);
            metrics::counter!(TASKS_FAILED).increment(1);
            let failure = FailureOutcome::new("ProcessingError", processing_error.to_string())
                .original_message(&raw)
                .metadata(task.source.clone())
                .context(task.to_request());
            publish_failure_and_commit(publisher, failure, commit).await;
        }
    }
}
