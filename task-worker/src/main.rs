use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use common_kafka::kafka_consumer::SingleTopicConsumer;
use common_kafka::kafka_producer::create_kafka_producer;
use envconfig::Envconfig;
use health::HealthRegistry;
use task_common::metrics::{serve, setup_metrics_router};
use task_common::processor::ProcessorRegistry;
use task_common::validation::TaskSchema;
use task_worker::config::Config;
use task_worker::error::WorkerError;
use task_worker::pool::WorkerPool;
use task_worker::publisher::ResultPublisher;
use task_worker::sequential::SequentialPipeline;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer: tracing_subscriber::filter::Filtered<
        tracing_subscriber::fmt::Layer<tracing_subscriber::Registry>,
        EnvFilter,
        tracing_subscriber::Registry,
    > = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "task processing service"
}

fn start_health_liveness_server(config: &Config, liveness: HealthRegistry) -> JoinHandle<()> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .merge(setup_metrics_router());
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    })
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env()?;

    let liveness = HealthRegistry::new("liveness");

    let consumer = SingleTopicConsumer::new(config.kafka.clone(), config.consumer_config())?;
    let producer_liveness = liveness.register("kafka_producer", Duration::from_secs(30));
    let producer = create_kafka_producer(&config.kafka, producer_liveness).await?;
    let publisher = ResultPublisher::new(
        producer,
        config.producer_topic.clone(),
        config.error_topic(),
    );

    let schema = TaskSchema::by_name(&config.validator_schema)
        .ok_or_else(|| WorkerError::UnknownSchema(config.validator_schema.clone()))?;
    let processor = ProcessorRegistry::with_builtins()
        .resolve(&config.processor)
        .ok_or_else(|| WorkerError::UnknownProcessor(config.processor.clone()))?;

    info!(
        "consuming from {}, publishing results to {} and errors to {}",
        config.consumer_topic,
        config.producer_topic,
        config.error_topic()
    );

    start_health_liveness_server(&config, liveness.clone());

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal.cancel();
        }
    });

    if config.max_workers <= 1 {
        SequentialPipeline::new(consumer, publisher, schema, processor, shutdown, liveness)
            .run()
            .await
    } else {
        WorkerPool::new(
            consumer,
            publisher,
            schema,
            processor,
            config.max_workers,
            config.effective_queue_size(),
            shutdown,
            liveness,
        )
        .run()
        .await
    }
}
