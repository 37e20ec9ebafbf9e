use rdkafka::error::KafkaError;
use thiserror::Error;

/// Errors allowed to terminate the service. Everything task-scoped is
/// converted into a failure outcome long before it gets here.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Config(#[from] envconfig::Error),
    #[error("unknown processor: {0}")]
    UnknownProcessor(String),
    #[error("unknown validator schema: {0}")]
    UnknownSchema(String),
    #[error("transport error: {0}")]
    Transport(#[from] KafkaError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
