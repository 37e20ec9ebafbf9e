use common_kafka::kafka_producer::{send_json_to_kafka, KafkaContext, KafkaProduceError};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::FutureProducer;
use serde_json::Value;
use task_common::outcome::{FailureOutcome, SuccessOutcome};
use task_common::task::Task;

/// Serializes processing outcomes and emits them downstream: successes to
/// the results topic, failures to its error sibling. Held by value inside
/// each pipeline; the underlying producer is shared.
pub struct ResultPublisher {
    producer: FutureProducer<KafkaContext>,
    producer_topic: String,
    error_topic: String,
}

impl ResultPublisher {
    pub fn new(
        producer: FutureProducer<KafkaContext>,
        producer_topic: String,
        error_topic: String,
    ) -> Self {
        Self {
            producer,
            producer_topic,
            error_topic,
        }
    }

    /// Publish a success outcome, keyed by task id so outcomes for one task
    /// land on one partition.
    pub async fn publish_success(
        &self,
        task: &Task,
        processor: &str,
        result: Value,
    ) -> Result<(), KafkaProduceError> {
        let outcome = SuccessOutcome::new(task, processor, result);
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "processor_type",
                value: Some(processor),
            })
            .insert(Header {
                key: "task_id",
                value: Some(task.task_id.as_str()),
            })
            .insert(Header {
                key: "status",
                value: Some("success"),
            });

        send_json_to_kafka(
            &self.producer,
            &self.producer_topic,
            Some(&task.task_id),
            Some(headers),
            &outcome,
        )
        .await
    }

    pub async fn publish_failure(
        &self,
        failure: &FailureOutcome,
    ) -> Result<(), KafkaProduceError> {
        let timestamp = failure.timestamp.to_rfc3339();
        let mut headers = OwnedHeaders::new()
            .insert(Header {
                key: "error_type",
                value: Some(failure.error_type.as_str()),
            })
            .insert(Header {
                key: "timestamp",
                value: Some(timestamp.as_str()),
            });
        if let Some(metadata) = &failure.message_metadata {
            headers = headers.insert(Header {
                key: "original_topic",
                value: Some(metadata.topic.as_str()),
            });
        }

        send_json_to_kafka(&self.producer, &self.error_topic, None, Some(headers), failure).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common_kafka::config::ConsumerConfig;
    use common_kafka::kafka_consumer::SingleTopicConsumer;
    use common_kafka::test::{create_mock_kafka, test_kafka_config};
    use serde_json::json;
    use std::time::Duration;
    use task_common::task::SourceMetadata;
    use tokio::time::timeout;
    use uuid::Uuid;

    fn task() -> Task {
        Task {
            task_id: "t1".to_string(),
            payload: json!({"x": 1}).as_object().unwrap().clone(),
            priority: Some(1),
            source: SourceMetadata {
                topic: "task-requests".to_string(),
                partition: 0,
                offset: 5,
                timestamp: None,
                received_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn published_outcomes_carry_shape_and_headers() {
        let (cluster, producer) = create_mock_kafka().await;
        let results_topic = format!("results_{}", Uuid::new_v4());
        let error_topic = format!("{results_topic}-errors");
        cluster
            .create_topic(&results_topic, 1, 1)
            .expect("failed to create topic");
        cluster
            .create_topic(&error_topic, 1, 1)
            .expect("failed to create topic");

        let publisher = ResultPublisher::new(
            producer,
            results_topic.clone(),
            error_topic.clone(),
        );

        publisher
            .publish_success(&task(), "echo", json!({"x": 2}))
            .await
            .expect("failed to publish success");

        let failure = FailureOutcome::new("SchemaError", "missing field task_id".to_string())
            .original_message(br#"{"data": {}}"#)
            .metadata(task().source);
        publisher
            .publish_failure(&failure)
            .await
            .expect("failed to publish failure");

        let config = test_kafka_config(cluster.bootstrap_servers());
        let results_consumer = SingleTopicConsumer::new(
            config.clone(),
            ConsumerConfig::new(&results_topic, "results-check"),
        )
        .expect("failed to create consumer");
        let record = timeout(Duration::from_secs(10), results_consumer.recv())
            .await
            .expect("timed out waiting for success outcome")
            .expect("failed to receive success outcome");

        let outcome: SuccessOutcome =
            serde_json::from_slice(&record.payload).expect("success outcome should be JSON");
        assert_eq!(outcome.status, "completed");
        assert_eq!(outcome.task_id, "t1");
        assert_eq!(outcome.processor, "echo");
        assert_eq!(outcome.result, json!({"x": 2}));
        assert_eq!(record.key.as_deref(), Some("t1".as_bytes()));
        assert_eq!(
            record.headers.get("status").map(Vec::as_slice),
            Some("success".as_bytes())
        );

        let errors_consumer = SingleTopicConsumer::new(
            config,
            ConsumerConfig::new(&error_topic, "errors-check"),
        )
        .expect("failed to create consumer");
        let record = timeout(Duration::from_secs(10), errors_consumer.recv())
            .await
            .expect("timed out waiting for failure outcome")
            .expect("failed to receive failure outcome");

        let outcome: FailureOutcome =
            serde_json::from_slice(&record.payload).expect("failure outcome should be JSON");
        assert_eq!(outcome.error_type, "SchemaError");
        assert_eq!(outcome.original_message.as_deref(), Some(r#"{"data": {}}"#));
        assert_eq!(
            record.headers.get("error_type").map(Vec::as_slice),
            Some("SchemaError".as_bytes())
        );
        assert_eq!(
            record.headers.get("original_topic").map(Vec::as_slice),
            Some("task-requests".as_bytes())
        );
    }
}
