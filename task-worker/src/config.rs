use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "task-requests")]
    pub consumer_topic: String,

    #[envconfig(default = "task-worker")]
    pub consumer_group: String,

    #[envconfig(default = "earliest")]
    pub consumer_offset_reset: String,

    #[envconfig(default = "task-results")]
    pub producer_topic: String,

    #[envconfig(default = "-errors")]
    pub error_topic_suffix: String,

    /// Worker pool size. 1 selects the strictly-ordered sequential pipeline.
    #[envconfig(default = "5")]
    pub max_workers: usize,

    /// Capacity of the bounded queue between intake and the workers.
    /// 0 derives it from the pool size.
    #[envconfig(default = "0")]
    pub queue_size: usize,

    /// Name of the processor to run tasks through, resolved against the
    /// registry at startup.
    #[envconfig(default = "echo")]
    pub processor: String,

    /// Name of the request schema to validate against.
    #[envconfig(default = "task-request")]
    pub validator_schema: String,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Failure outcomes go to the results topic's error sibling.
    pub fn error_topic(&self) -> String {
        format!("{}{}", self.producer_topic, self.error_topic_suffix)
    }

    pub fn effective_queue_size(&self) -> usize {
        if self.queue_size == 0 {
            self.max_workers * 2
        } else {
            self.queue_size
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(&self.consumer_topic, &self.consumer_group)
            .offset_reset(&self.consumer_offset_reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        // Nested KafkaConfig fields all carry defaults, so an empty
        // environment is a valid starting point.
        Config::init_from_hashmap(&Default::default()).expect("defaults should parse")
    }

    #[test]
    fn error_topic_is_derived_from_producer_topic() {
        let mut cfg = config();
        cfg.producer_topic = "results".to_string();
        cfg.error_topic_suffix = "-dlq".to_string();
        assert_eq!(cfg.error_topic(), "results-dlq");
    }

    #[test]
    fn queue_size_defaults_to_twice_the_workers() {
        let mut cfg = config();
        cfg.max_workers = 4;
        cfg.queue_size = 0;
        assert_eq!(cfg.effective_queue_size(), 8);

        cfg.queue_size = 3;
        assert_eq!(cfg.effective_queue_size(), 3);
    }
}
