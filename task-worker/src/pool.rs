use std::sync::Arc;
use std::time::Duration;

use common_kafka::kafka_consumer::{
    backoff_consume_error, CommitHandle, DeliveredRecord, SingleTopicConsumer,
};
use health::{HealthHandle, HealthRegistry};
use task_common::processor::TaskProcessor;
use task_common::task::Task;
use task_common::validation::TaskSchema;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::WorkerError;
use crate::metrics_consts::{QUEUE_DEPTH, RECORDS_RECEIVED};
use crate::publisher::ResultPublisher;
use crate::{reject_record, run_task, source_metadata};

/// A task ready for a worker, with everything needed to publish and commit
/// its outcome independently of the other workers.
struct WorkItem {
    task: Task,
    raw: Vec<u8>,
    commit: CommitHandle,
    /// Intake sequence number, for diagnostics only: the queue is FIFO, so
    /// ordering is implied by position.
    sequence: u64,
}

enum QueueItem {
    Work(Box<WorkItem>),
    /// Shutdown marker; the intake loop pushes one per worker.
    Stop,
}

/// The parallel pipeline variant: a single intake loop validates records and
/// feeds a bounded queue drained by `max_workers` workers. Intake order into
/// the queue is preserved, completion order across workers is not; each
/// worker commits only its own task's offset after publishing.
///
/// A full queue suspends the intake loop, which in turn stalls fetching from
/// the broker. That is the sole backpressure mechanism.
pub struct WorkerPool {
    consumer: SingleTopicConsumer,
    publisher: Arc<ResultPublisher>,
    schema: TaskSchema,
    processor: Arc<dyn TaskProcessor>,
    max_workers: usize,
    queue_size: usize,
    shutdown: CancellationToken,
    health: HealthRegistry,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        consumer: SingleTopicConsumer,
        publisher: ResultPublisher,
        schema: TaskSchema,
        processor: Arc<dyn TaskProcessor>,
        max_workers: usize,
        queue_size: usize,
        shutdown: CancellationToken,
        health: HealthRegistry,
    ) -> Self {
        Self {
            consumer,
            publisher: Arc::new(publisher),
            schema,
            processor,
            max_workers: max_workers.max(1),
            queue_size: queue_size.max(1),
            shutdown,
            health,
        }
    }

    /// Run until shutdown is signalled or the transport fails fatally. On
    /// shutdown the intake loop stops first, then every worker drains to a
    /// stop marker and finishes its current task; no worker is killed
    /// mid-task.
    pub async fn run(&self) -> Result<(), WorkerError> {
        info!(
            "worker pool started: workers={}, queue_size={}, processor={}, schema={}",
            self.max_workers,
            self.queue_size,
            self.processor.name(),
            self.schema.name()
        );

        let (queue, rx) = mpsc::channel::<QueueItem>(self.queue_size);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.max_workers);
        for worker_id in 0..self.max_workers {
            let liveness = self
                .health
                .register(format!("worker-{worker_id}"), Duration::from_secs(30));
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                rx.clone(),
                self.publisher.clone(),
                self.processor.clone(),
                liveness,
            )));
        }

        let result = self.intake_loop(&queue).await;

        // One stop marker per worker; each worker exits on the first marker
        // it dequeues, so every worker observes exactly one.
        for _ in 0..self.max_workers {
            if queue.send(QueueItem::Stop).await.is_err() {
                break;
            }
        }
        for (worker_id, worker) in workers.into_iter().enumerate() {
            if let Err(join_error) = worker.await {
                error!("worker {} panicked: {}", worker_id, join_error);
            }
        }

        info!("worker pool stopped");
        result
    }

    /// FETCH → VALIDATE → ENQUEUE, repeated. Validation failures are
    /// published and committed here, without ever consuming a worker slot.
    async fn intake_loop(&self, queue: &mpsc::Sender<QueueItem>) -> Result<(), WorkerError> {
        let liveness = self.health.register("intake", Duration::from_secs(30));

        let mut sequence = 0_u64;
        let mut consecutive_errors = 0_u64;
        loop {
            liveness.report_healthy();

            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                // Idle tick so liveness keeps reporting on a quiet topic
                _ = tokio::time::sleep(Duration::from_secs(10)) => continue,
                received = self.consumer.recv() => received,
            };

            let record = match received {
                Ok(record) => {
                    consecutive_errors = 0;
                    record
                }
                Err(consume_error) => {
                    consecutive_errors += 1;
                    if backoff_consume_error(&consume_error, consecutive_errors).await {
                        return Err(consume_error.into());
                    }
                    continue;
                }
            };

            metrics::counter!(RECORDS_RECEIVED).increment(1);
            let source = source_metadata(&record);
            let DeliveredRecord {
                payload, commit, ..
            } = record;

            match self.schema.validate(&payload, source.clone()) {
                Ok(task) => {
                    let item = WorkItem {
                        task,
                        raw: payload,
                        commit,
                        sequence,
                    };
                    sequence += 1;

                    metrics::gauge!(QUEUE_DEPTH)
                        .set((self.queue_size - queue.capacity()) as f64);
                    // Suspends when the queue is full, which stalls fetching
                    // from the broker until a worker frees a slot.
                    if queue.send(QueueItem::Work(Box::new(item))).await.is_err() {
                        error!("work queue closed, stopping intake");
                        break;
                    }
                }
                Err(validation_error) => {
                    reject_record(&self.publisher, &validation_error, &payload, source, commit)
                        .await;
                }
            }
        }

        Ok(())
    }
}

/// DEQUEUE → PROCESS → PUBLISH → COMMIT until a stop marker arrives. The
/// receiver is shared behind a mutex; the lock is held only while waiting
/// for the next item, never while processing one.
async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<QueueItem>>>,
    publisher: Arc<ResultPublisher>,
    processor: Arc<dyn TaskProcessor>,
    liveness: HealthHandle,
) {
    info!("worker {} started", worker_id);

    loop {
        liveness.report_healthy();

        let dequeued = {
            let mut queue = queue.lock().await;
            // Bounded wait so an idle worker still reports liveness
            tokio::time::timeout(Duration::from_secs(10), queue.recv()).await
        };

        let item = match dequeued {
            Err(_) => continue,
            Ok(Some(QueueItem::Work(item))) => item,
            Ok(Some(QueueItem::Stop)) | Ok(None) => break,
        };

        debug!(
            "worker {} processing task {} (intake #{})",
            worker_id, item.task.task_id, item.sequence
        );
        let WorkItem {
            task, raw, commit, ..
        } = *item;
        run_task(&publisher, processor.as_ref(), task, raw, commit).await;
    }

    info!("worker {} stopped", worker_id);
}
