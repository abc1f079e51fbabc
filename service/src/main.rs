//! Warehouse batch service.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warehouse_amqp::AmqpDeliverySource;
use warehouse_batch::{DemoProducer, ServiceConfig, http, telemetry};
use warehouse_core::broker::BrokerError;
use warehouse_core::handler::LoggingActionHandler;
use warehouse_core::processor::EventProcessor;
use warehouse_core::translator::MessageTranslator;
use warehouse_redpanda::RedpandaConnector;
use warehouse_runtime::metrics::install_prometheus;
use warehouse_runtime::retry::retry_with_predicate;
use warehouse_runtime::{BackoffPolicy, ReliableConsumer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let config = ServiceConfig::from_env().context("Invalid configuration")?;
    info!(
        kafka_brokers = %config.kafka.brokers,
        kafka_topic = %config.kafka.topic,
        dlq_topic = %config.kafka.dlq_topic,
        rabbitmq_enabled = config.rabbitmq.enabled,
        demo_enabled = config.demo.enabled,
        http_port = config.http_port,
        "Starting warehouse batch service"
    );

    let metrics_handle = install_prometheus()?;
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let mut tasks: JoinSet<&'static str> = JoinSet::new();
    start_kafka(&config, &mut tasks, &shutdown)?;

    if config.rabbitmq.enabled {
        start_rabbitmq(&config, &mut tasks, &shutdown).await?;
    }

    let router = http::router(metrics_handle);
    let port = config.http_port;
    let http_shutdown = shutdown.child_token();
    tasks.spawn(async move {
        if let Err(e) = http::serve(port, router, http_shutdown).await {
            error!(error = %e, "HTTP server failed");
        }
        "http"
    });

    tokio::select! {
        () = shutdown.cancelled() => {},
        Some(joined) = tasks.join_next() => {
            match joined {
                Ok(task) => warn!(task, "Task exited before shutdown"),
                Err(e) => error!(error = %e, "Task panicked"),
            }
            shutdown.cancel();
        },
    }

    drain(tasks, config.shutdown_grace).await;
    info!("Warehouse batch service stopped");
    Ok(())
}

/// Spawns the strict Kafka consumer and, if enabled, the demo producer.
fn start_kafka(
    config: &ServiceConfig,
    tasks: &mut JoinSet<&'static str>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let connector = RedpandaConnector::builder()
        .brokers(&config.kafka.brokers)
        .group_id(&config.kafka.group_id)
        .build()
        .context("Failed to configure Kafka")?;

    let source = connector
        .subscribe(&config.kafka.topic)
        .context("Failed to subscribe to Kafka")?;
    let dead_letters = connector
        .dead_letter_sink(&config.kafka.dlq_topic)
        .context("Failed to create the dead-letter producer")?;

    let consumer = ReliableConsumer::new(
        config.consumer_config("kafka"),
        source,
        MessageTranslator::strict(),
        EventProcessor::new(LoggingActionHandler),
    )
    .with_dead_letter_sink(Arc::new(dead_letters));

    let token = shutdown.child_token();
    tasks.spawn(async move {
        let report = consumer.run(token).await;
        info!(?report, "Kafka consumer finished");
        "kafka-consumer"
    });

    if config.demo.enabled {
        let publisher = connector
            .publisher(&config.kafka.topic)
            .context("Failed to create the demo publisher")?;
        let producer = DemoProducer::new(Arc::new(publisher), config.demo.interval);
        let token = shutdown.child_token();
        tasks.spawn(async move {
            producer.run(token).await;
            "demo-producer"
        });
    }

    Ok(())
}

/// Connects to RabbitMQ, retrying while the server is unreachable, and spawns
/// the lenient consumer.
async fn start_rabbitmq(
    config: &ServiceConfig,
    tasks: &mut JoinSet<&'static str>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let settings = &config.rabbitmq.settings;
    let policy = BackoffPolicy::builder()
        .max_retries(5)
        .initial_delay(Duration::from_secs(1))
        .max_delay(Duration::from_secs(30))
        .multiplier(2.0)
        .build();

    let source = tokio::select! {
        () = shutdown.cancelled() => return Ok(()),
        connected = retry_with_predicate(
            policy,
            || AmqpDeliverySource::connect(settings),
            BrokerError::is_transient,
        ) => connected.context("Failed to set up RabbitMQ")?,
    };

    let consumer = ReliableConsumer::new(
        config.consumer_config("rabbitmq"),
        source,
        MessageTranslator::lenient(),
        EventProcessor::new(LoggingActionHandler),
    );

    let token = shutdown.child_token();
    tasks.spawn(async move {
        let report = consumer.run(token).await;
        info!(?report, "RabbitMQ consumer finished");
        "rabbitmq-consumer"
    });
    Ok(())
}

/// Waits for every task, up to `grace`.
async fn drain(mut tasks: JoinSet<&'static str>, grace: Duration) {
    let joined = tokio::time::timeout(grace, async {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(task) => info!(task, "Task stopped"),
                Err(e) => error!(error = %e, "Task failed during shutdown"),
            }
        }
    })
    .await;

    if joined.is_err() {
        warn!(
            remaining = tasks.len(),
            grace_secs = grace.as_secs(),
            "Grace period elapsed, aborting remaining tasks"
        );
        tasks.abort_all();
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
