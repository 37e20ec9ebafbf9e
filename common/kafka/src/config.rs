use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

/// The binding of a consumer to one topic. Assembled by the service from its
/// own configuration surface rather than read from the environment directly,
/// since topic and group names are application-specific.
#[derive(Clone)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group: String,
    /// Where to start reading when the group has no committed offset:
    /// "earliest" or "latest".
    pub offset_reset: String,
}

impl ConsumerConfig {
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            offset_reset: "earliest".to_string(),
        }
    }

    pub fn offset_reset(mut self, offset_reset: impl Into<String>) -> Self {
        self.offset_reset = offset_reset.into();
        self
    }
}
