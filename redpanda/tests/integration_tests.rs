//! Integration tests for the Kafka adapters against a real broker.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Publish then pull round-trip with ack
//! - Requeue returns the same message, flagged as redelivered
//! - Dead-letter records land on the DLQ topic
//! - The consumer loop drains a topic end to end
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they require Docker
//! and take 15-60 seconds each to start Kafka.
//!
//! ```bash
//! cargo test -p warehouse-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use tokio_util::sync::CancellationToken;
use warehouse_core::environment::Clock;
use warehouse_core::broker::{
    DeadLetterReason, DeadLetterRecord, DeadLetterSink, Delivery, DeliverySource, EventPublisher,
};
use warehouse_core::processor::EventProcessor;
use warehouse_core::translator::MessageTranslator;
use warehouse_redpanda::{KafkaDeliverySource, RedpandaConnector};
use warehouse_runtime::consumer::{ConsumerConfig, ReliableConsumer};
use warehouse_testing::{RecordingActionHandler, fixtures, test_clock};

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn connector(brokers: &str, group: &str) -> RedpandaConnector {
    RedpandaConnector::builder()
        .brokers(brokers)
        .group_id(group)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to build connector")
}

/// Publish until the broker accepts, which also auto-creates the topic.
async fn publish_when_ready(connector: &RedpandaConnector, topic: &str, key: &str, payload: &[u8]) {
    let publisher = connector.publisher(topic).expect("Failed to create publisher");
    for attempt in 1..=60 {
        if publisher.publish_raw(key, payload).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(attempt != 60, "Kafka did not accept messages on {topic}");
    }
}

async fn pull(source: &mut KafkaDeliverySource) -> Delivery {
    for _ in 0..30 {
        if let Ok(Some(delivery)) = source.pull_next(Duration::from_secs(2)).await {
            return delivery;
        }
    }
    panic!("No delivery within 60 seconds");
}

#[tokio::test]
#[ignore]
async fn published_event_is_pulled_and_acked() {
    let (_kafka, brokers) = start_kafka().await;
    let connector = connector(&brokers, "round-trip");
    let event = fixtures::event("order.created", "ord-1");

    publish_when_ready(&connector, "order-events", "warmup", b"warmup").await;
    connector
        .publisher("order-events")
        .unwrap()
        .publish(&event)
        .await
        .expect("Failed to publish event");

    let mut source = connector.subscribe("order-events").unwrap();
    let warmup = pull(&mut source).await;
    assert_eq!(warmup.payload, b"warmup");
    source.ack(warmup.handle).await.unwrap();

    let delivery = pull(&mut source).await;
    let translated = MessageTranslator::strict().translate(&delivery.payload).unwrap();
    assert_eq!(translated.event, event);
    assert!(delivery.key.starts_with("order-events/"));
    source.ack(delivery.handle).await.unwrap();
    source.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn requeued_message_is_redelivered() {
    let (_kafka, brokers) = start_kafka().await;
    let connector = connector(&brokers, "requeue");
    publish_when_ready(
        &connector,
        "requeue-events",
        "k",
        b"{\"event_type\":\"order.created\"}",
    )
    .await;

    let mut source = connector.subscribe("requeue-events").unwrap();
    let first = pull(&mut source).await;
    source.nack(first.handle, true).await.unwrap();

    let second = pull(&mut source).await;
    assert_eq!(second.key, first.key);
    assert!(second.redelivered);
    assert_eq!(second.payload, first.payload);
    source.ack(second.handle).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn dead_letter_record_lands_on_dlq_topic() {
    let (_kafka, brokers) = start_kafka().await;
    let connector = connector(&brokers, "dlq-reader");
    publish_when_ready(&connector, "order-events.dlq", "warmup", b"warmup").await;

    let record = DeadLetterRecord {
        consumer: "kafka".to_string(),
        message_key: "order-events/0/7".to_string(),
        payload: b"not json".to_vec(),
        reason: DeadLetterReason::Malformed,
        error: "expected value".to_string(),
        attempts: 0,
        failed_at: test_clock().now(),
    };
    connector
        .dead_letter_sink("order-events.dlq")
        .unwrap()
        .dead_letter(&record)
        .await
        .expect("Failed to dead-letter");

    let mut source = connector.subscribe("order-events.dlq").unwrap();
    let warmup = pull(&mut source).await;
    source.ack(warmup.handle).await.unwrap();

    let delivery = pull(&mut source).await;
    let stored: DeadLetterRecord =
        serde_json::from_slice(&delivery.payload).expect("DLQ payload is a dead-letter record");
    assert_eq!(stored, record);
}

#[tokio::test]
#[ignore]
async fn consumer_loop_drains_topic() {
    let (_kafka, brokers) = start_kafka().await;
    let connector = connector(&brokers, "drain");
    publish_when_ready(&connector, "drain-events", "warmup", b"Hello Kafka at noon").await;

    let publisher = connector.publisher("drain-events").unwrap();
    for (event_type, order_id) in [("order.created", "ord-1"), ("order.cancelled", "ord-2")] {
        publisher.publish(&fixtures::event(event_type, order_id)).await.unwrap();
    }

    let handler = RecordingActionHandler::new();
    let consumer = ReliableConsumer::new(
        ConsumerConfig::new("kafka").with_pull_timeout(Duration::from_secs(1)),
        connector.subscribe("drain-events").unwrap(),
        MessageTranslator::strict(),
        EventProcessor::new(handler.clone()),
    );

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(consumer.run(shutdown.clone()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    while handler.calls().len() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    shutdown.cancel();
    let report = task.await.unwrap();

    assert_eq!(handler.calls().len(), 2);
    assert_eq!(report.discarded, 1);
    assert_eq!(report.acked, 2);
}
