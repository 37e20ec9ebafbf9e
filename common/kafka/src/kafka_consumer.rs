use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::{KafkaError, RDKafkaErrorCode},
    message::Headers,
    ClientConfig, Message, Offset, TopicPartitionList,
};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::{ConsumerConfig, KafkaConfig};

/// A consumer bound to a single topic, yielding raw records together with a
/// commit handle. Nothing is committed automatically: the caller advances the
/// group's offset through `CommitHandle::commit` once the record's downstream
/// effects have been produced.
#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CommitErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: KafkaConfig,
        consumer_config: ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.group)
            .set("auto.offset.reset", &consumer_config.offset_reset)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.topic.as_str()])?;
        info!("subscribed to topic {}", consumer_config.topic);

        let inner = Inner {
            consumer,
            topic: consumer_config.topic,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Wait for the next record on the topic. The payload is surfaced as raw
    /// bytes; decoding and validation belong to the caller.
    pub async fn recv(&self) -> Result<DeliveredRecord, KafkaError> {
        let message = self.inner.consumer.recv().await?;

        let commit = CommitHandle {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let headers = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|header| {
                        header.value.map(|value| (header.key.to_owned(), value.to_vec()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(DeliveredRecord {
            topic: message.topic().to_owned(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|key| key.to_vec()),
            payload: message.payload().map(|payload| payload.to_vec()).unwrap_or_default(),
            timestamp: message
                .timestamp()
                .to_millis()
                .and_then(DateTime::from_timestamp_millis),
            headers,
            commit,
        })
    }
}

/// One record pulled off the broker, owned by the caller until its offset is
/// committed. An empty `payload` means the broker record carried none.
pub struct DeliveredRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub timestamp: Option<DateTime<Utc>>,
    pub headers: HashMap<String, Vec<u8>>,
    pub commit: CommitHandle,
}

/// Marks a record as processed by committing the offset one past it for its
/// partition. Consuming the handle makes double commits unrepresentable.
pub struct CommitHandle {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl CommitHandle {
    pub fn commit(self) -> Result<(), CommitErr> {
        let inner = self.handle.upgrade().ok_or(CommitErr::Gone)?;
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(
            &inner.topic,
            self.partition,
            Offset::Offset(self.offset + 1),
        )?;
        inner.consumer.commit(&offsets, CommitMode::Async)?;
        Ok(())
    }
}

/// Classify a consume error, sleeping through the transient ones. Returns
/// true when the error is fatal and the receive loop should stop. The
/// `consecutive` count bounds the backoff on repeated failures.
pub async fn backoff_consume_error(error: &KafkaError, consecutive: u64) -> bool {
    match error {
        KafkaError::MessageConsumption(code) => {
            match code {
                RDKafkaErrorCode::PartitionEOF | RDKafkaErrorCode::OperationTimedOut => {}
                RDKafkaErrorCode::OffsetOutOfRange => {
                    // "auto.offset.reset" seeks to head or tail of the
                    // partition in coordination with the broker
                    warn!("Offset out of range, waiting for reset");
                    sleep(Duration::from_millis(500)).await;
                }
                _ => {
                    warn!("Kafka consumer error: {code:?}");
                    sleep(Duration::from_millis(100 * consecutive.min(10))).await;
                }
            }
            false
        }
        KafkaError::MessageConsumptionFatal(code) => {
            error!("Fatal Kafka consumer error: {code:?}");
            true
        }
        KafkaError::Global(code) => match code {
            RDKafkaErrorCode::AllBrokersDown => {
                warn!("All brokers down, waiting for reconnect");
                sleep(Duration::from_secs(consecutive.min(5))).await;
                false
            }
            RDKafkaErrorCode::BrokerTransportFailure => {
                warn!("Broker transport failure, waiting for reconnect");
                sleep(Duration::from_secs(consecutive.min(3))).await;
                false
            }
            RDKafkaErrorCode::Authentication => {
                error!("Authentication failed: {code:?}");
                true
            }
            _ => {
                warn!("Global Kafka error: {code:?}");
                sleep(Duration::from_millis(500 * consecutive.min(6))).await;
                false
            }
        },
        KafkaError::Canceled => {
            info!("Consumer canceled");
            true
        }
        _ => {
            error!("Unexpected Kafka error: {error:?}");
            sleep(Duration::from_millis(100 * consecutive.min(10))).await;
            false
        }
    }
}
