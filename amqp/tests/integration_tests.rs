//! Integration tests for the RabbitMQ adapters against a real broker.
//!
//! ```bash
//! cargo test -p warehouse-amqp --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::rabbitmq::RabbitMq;
use tokio_util::sync::CancellationToken;
use warehouse_amqp::{AmqpDeliverySource, AmqpEventPublisher, AmqpSettings};
use warehouse_core::broker::{Delivery, DeliverySource, EventPublisher};
use warehouse_core::processor::EventProcessor;
use warehouse_core::routing::WarehouseAction;
use warehouse_core::translator::MessageTranslator;
use warehouse_runtime::consumer::{ConsumerConfig, ReliableConsumer};
use warehouse_testing::{RecordingActionHandler, fixtures};

async fn start_rabbitmq(queue: &str) -> (ContainerAsync<RabbitMq>, AmqpSettings) {
    let rabbit = RabbitMq::default()
        .start()
        .await
        .expect("Failed to start RabbitMQ container");

    let host = rabbit.get_host().await.expect("Failed to get host");
    let port = rabbit
        .get_host_port_ipv4(5672)
        .await
        .expect("Failed to get port");

    let settings = AmqpSettings {
        url: format!("amqp://guest:guest@{host}:{port}/"),
        queue: queue.to_string(),
        ..AmqpSettings::default()
    };
    (rabbit, settings)
}

async fn pull(source: &mut AmqpDeliverySource) -> Delivery {
    for _ in 0..15 {
        if let Some(delivery) = source.pull_next(Duration::from_secs(2)).await.unwrap() {
            return delivery;
        }
    }
    panic!("No delivery within 30 seconds");
}

#[tokio::test]
#[ignore]
async fn raw_message_round_trip_with_ack() {
    let (_rabbit, settings) = start_rabbitmq("round-trip").await;
    let mut source = AmqpDeliverySource::connect(&settings).await.unwrap();
    let publisher = AmqpEventPublisher::connect(&settings).await.unwrap();

    publisher.publish_raw("msg-1", b"Hello RabbitMQ").await.unwrap();

    let delivery = pull(&mut source).await;
    assert_eq!(delivery.payload, b"Hello RabbitMQ");
    assert_eq!(delivery.key, "msg-1");
    assert!(!delivery.redelivered);
    source.ack(delivery.handle).await.unwrap();

    assert!(
        source
            .pull_next(Duration::from_millis(500))
            .await
            .unwrap()
            .is_none()
    );
    source.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn nack_with_requeue_redelivers() {
    let (_rabbit, settings) = start_rabbitmq("requeue").await;
    let mut source = AmqpDeliverySource::connect(&settings).await.unwrap();
    let publisher = AmqpEventPublisher::connect(&settings).await.unwrap();

    publisher.publish_raw("msg-1", b"again").await.unwrap();

    let first = pull(&mut source).await;
    source.nack(first.handle, true).await.unwrap();

    let second = pull(&mut source).await;
    assert_eq!(second.key, first.key);
    assert!(second.redelivered);
    source.nack(second.handle, false).await.unwrap();

    assert!(
        source
            .pull_next(Duration::from_millis(500))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[ignore]
async fn lenient_consumer_processes_plain_text() {
    let (_rabbit, settings) = start_rabbitmq("lenient").await;
    let source = AmqpDeliverySource::connect(&settings).await.unwrap();
    let publisher = AmqpEventPublisher::connect(&settings).await.unwrap();

    publisher.publish_raw("plain", b"Hello RabbitMQ").await.unwrap();
    // Routed by event type, so only the binding key reaches the queue.
    publisher
        .publish(&fixtures::event("order.created", "ord-1"))
        .await
        .unwrap();

    let handler = RecordingActionHandler::new();
    let consumer = ReliableConsumer::new(
        ConsumerConfig::new("rabbitmq").with_pull_timeout(Duration::from_secs(1)),
        source,
        MessageTranslator::lenient(),
        EventProcessor::new(handler.clone()),
    );

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(consumer.run(shutdown.clone()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while handler.calls().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    shutdown.cancel();
    let report = task.await.unwrap();

    assert_eq!(handler.actions(), vec![WarehouseAction::AllocateInventory]);
    assert_eq!(report.acked, 2);
}
