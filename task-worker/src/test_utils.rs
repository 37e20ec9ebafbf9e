use std::time::Duration;

use async_trait::async_trait;
use common_kafka::config::{ConsumerConfig, KafkaConfig};
use common_kafka::kafka_consumer::SingleTopicConsumer;
use common_kafka::kafka_producer::{
    create_kafka_producer, send_json_to_kafka, KafkaContext,
};
use common_kafka::test::{create_mock_kafka, test_kafka_config};
use health::HealthRegistry;
use rdkafka::mocking::MockCluster;
use rdkafka::producer::{DefaultProducerContext, FutureProducer};
use serde_json::Value;
use task_common::processor::{ProcessingError, TaskProcessor};
use task_common::task::Task;
use tokio::time::timeout;
use uuid::Uuid;

use crate::publisher::ResultPublisher;

/// A mock cluster with the three topics one pipeline run needs, plus a
/// producer for seeding requests.
pub struct TestHarness {
    pub cluster: MockCluster<'static, DefaultProducerContext>,
    pub seed_producer: FutureProducer<KafkaContext>,
    pub requests_topic: String,
    pub results_topic: String,
    pub error_topic: String,
}

pub async fn harness() -> TestHarness {
    let (cluster, seed_producer) = create_mock_kafka().await;
    let requests_topic = format!("requests_{}", Uuid::new_v4());
    let results_topic = format!("results_{}", Uuid::new_v4());
    let error_topic = format!("{results_topic}-errors");
    for topic in [&requests_topic, &results_topic, &error_topic] {
        cluster
            .create_topic(topic, 1, 1)
            .expect("failed to create mock topic");
    }

    TestHarness {
        cluster,
        seed_producer,
        requests_topic,
        results_topic,
        error_topic,
    }
}

impl TestHarness {
    pub fn kafka_config(&self) -> KafkaConfig {
        test_kafka_config(self.cluster.bootstrap_servers())
    }

    /// The consumer a pipeline under test reads requests from. Each call
    /// uses a fresh group so tests never share offsets.
    pub fn task_consumer(&self) -> SingleTopicConsumer {
        SingleTopicConsumer::new(
            self.kafka_config(),
            ConsumerConfig::new(&self.requests_topic, format!("workers_{}", Uuid::new_v4())),
        )
        .expect("failed to create task consumer")
    }

    pub async fn publisher(&self) -> ResultPublisher {
        let registry = HealthRegistry::new("test_liveness");
        let handle = registry.register("kafka_producer", Duration::from_secs(30));
        let producer = create_kafka_producer(&self.kafka_config(), handle)
            .await
            .expect("failed to create producer");
        ResultPublisher::new(
            producer,
            self.results_topic.clone(),
            self.error_topic.clone(),
        )
    }

    fn verification_consumer(&self, topic: &str) -> SingleTopicConsumer {
        SingleTopicConsumer::new(
            self.kafka_config(),
            ConsumerConfig::new(topic, format!("check_{}", Uuid::new_v4())),
        )
        .expect("failed to create verification consumer")
    }

    pub fn results_consumer(&self) -> SingleTopicConsumer {
        self.verification_consumer(&self.results_topic)
    }

    pub fn errors_consumer(&self) -> SingleTopicConsumer {
        self.verification_consumer(&self.error_topic)
    }

    pub async fn send_request(&self, request: &Value) {
        send_json_to_kafka(&self.seed_producer, &self.requests_topic, None, None, request)
            .await
            .expect("failed to seed request");
    }
}

/// Receive and decode the next outcome from a topic, failing the test if
/// none arrives in time.
pub async fn recv_json<T: serde::de::DeserializeOwned>(consumer: &SingleTopicConsumer) -> T {
    let record = timeout(Duration::from_secs(10), consumer.recv())
        .await
        .expect("timed out waiting for outcome")
        .expect("failed to receive outcome");
    serde_json::from_slice(&record.payload).expect("outcome should be valid JSON")
}

/// Asserts that no further record arrives on the topic within the window.
pub async fn assert_no_record(consumer: &SingleTopicConsumer, window: Duration) {
    if timeout(window, consumer.recv()).await.is_ok() {
        panic!("expected no further records on the topic");
    }
}

/// Doubles every integer field of the payload.
pub struct DoublingProcessor;

#[async_trait]
impl TaskProcessor for DoublingProcessor {
    fn name(&self) -> &'static str {
        "doubling"
    }

    async fn process(&self, task: &Task) -> Result<Value, ProcessingError> {
        let mut doubled = task.payload.clone();
        for value in doubled.values_mut() {
            if let Some(number) = value.as_i64() {
                *value = Value::from(number * 2);
            }
        }
        Ok(Value::Object(doubled))
    }
}

/// Sleeps for the payload's `sleep_ms` (if any) before echoing it back.
pub struct SleepyProcessor;

#[async_trait]
impl TaskProcessor for SleepyProcessor {
    fn name(&self) -> &'static str {
        "sleepy"
    }

    async fn process(&self, task: &Task) -> Result<Value, ProcessingError> {
        if let Some(sleep_ms) = task.payload.get("sleep_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
        Ok(Value::Object(task.payload.clone()))
    }
}

/// Fails tasks whose payload carries `"fail": true`, echoes the rest.
pub struct FlakyProcessor;

#[async_trait]
impl TaskProcessor for FlakyProcessor {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn process(&self, task: &Task) -> Result<Value, ProcessingError> {
        if task.payload.get("fail") == Some(&Value::Bool(true)) {
            return Err(ProcessingError::new(format!(
                "refusing to process task {}",
                task.task_id
            )));
        }
        Ok(Value::Object(task.payload.clone()))
    }
}
