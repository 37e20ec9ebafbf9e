use std::sync::Arc;
use std::time::Duration;

use common_kafka::kafka_consumer::{
    backoff_consume_error, DeliveredRecord, SingleTopicConsumer,
};
use health::HealthRegistry;
use task_common::processor::TaskProcessor;
use task_common::validation::TaskSchema;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::WorkerError;
use crate::metrics_consts::RECORDS_RECEIVED;
use crate::publisher::ResultPublisher;
use crate::{reject_record, run_task, source_metadata};

/// The strictly-ordered pipeline variant: one record in flight at a time,
/// and the next record is not fetched until the current one's offset is
/// committed. Outcome order matches intake order, at the cost of
/// throughput.
pub struct SequentialPipeline {
    consumer: SingleTopicConsumer,
    publisher: ResultPublisher,
    schema: TaskSchema,
    processor: Arc<dyn TaskProcessor>,
    shutdown: CancellationToken,
    health: HealthRegistry,
}

impl SequentialPipeline {
    pub fn new(
        consumer: SingleTopicConsumer,
        publisher: ResultPublisher,
        schema: TaskSchema,
        processor: Arc<dyn TaskProcessor>,
        shutdown: CancellationToken,
        health: HealthRegistry,
    ) -> Self {
        Self {
            consumer,
            publisher,
            schema,
            processor,
            shutdown,
            health,
        }
    }

    /// Run until shutdown is signalled or the transport fails fatally. Only
    /// transport-level errors can end this loop: everything task-scoped is
    /// converted into a failure outcome and committed past.
    pub async fn run(&self) -> Result<(), WorkerError> {
        let liveness = self.health.register("pipeline", Duration::from_secs(30));
        info!(
            "sequential pipeline started: processor={}, schema={}",
            self.processor.name(),
            self.schema.name()
        );

        let mut consecutive_errors = 0_u64;
        loop {
            liveness.report_healthy();

            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                // Idle tick so liveness keeps reporting on a quiet topic
                _ = tokio::time::sleep(Duration::from_secs(10)) => continue,
                received = self.consumer.recv() => received,
            };

            match received {
                Ok(record) => {
                    consecutive_errors = 0;
                    self.handle_record(record).await;
                }
                Err(consume_error) => {
                    consecutive_errors += 1;
                    if backoff_consume_error(&consume_error, consecutive_errors).await {
                        return Err(consume_error.into());
                    }
                }
            }
        }

        info!("sequential pipeline stopped");
        Ok(())
    }

    /// One record through validate, process, publish, commit. Validation
    /// failures skip straight to a failure outcome; either way the offset is
    /// committed before the next record is fetched.
    async fn handle_record(&self, record: DeliveredRecord) {
        metrics::counter!(RECORDS_RECEIVED).increment(1);
        let source = source_metadata(&record);
        let DeliveredRecord {
            payload, commit, ..
        } = record;

        match self.schema.validate(&payload, source.clone()) {
            Ok(task) => {
                debug!("processing task {}", task.task_id);
                run_task(
                    &self.publisher,
                    self.processor.as_ref(),
                    task,
                    payload,
                    commit,
                )
                .await;
            }
            Err(validation_error) => {
                reject_record(&self.publisher, &validation_error, &payload, source, commit).await;
            }
        }
    }
}
