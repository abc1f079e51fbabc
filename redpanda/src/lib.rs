//! Kafka/Redpanda adapters for the warehouse batch service.
//!
//! This crate implements the broker ports from `warehouse-core` on top of rdkafka:
//!
//! - [`KafkaDeliverySource`]: [`DeliverySource`](warehouse_core::broker::DeliverySource)
//!   over a `StreamConsumer` with manual offset commits
//! - [`KafkaEventPublisher`]: [`EventPublisher`](warehouse_core::broker::EventPublisher)
//!   over a `FutureProducer`
//! - [`KafkaDeadLetterSink`]: [`DeadLetterSink`](warehouse_core::broker::DeadLetterSink)
//!   writing JSON records to a dead-letter topic
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - `ack` and discarding `nack` commit the offset past the message
//! - requeueing `nack` seeks the partition back to the message, so the next pull
//!   returns it again
//! - a message that is never released is redelivered after a restart or rebalance
//!
//! Ordering is per partition. Events are keyed by order id, so all events of
//! one order land on the same partition.
//!
//! # Example
//!
//! ```no_run
//! use warehouse_redpanda::RedpandaConnector;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = RedpandaConnector::builder()
//!     .brokers("localhost:9092")
//!     .group_id("warehouse-batch")
//!     .build()?;
//!
//! let source = connector.subscribe("order-events")?;
//! let publisher = connector.publisher("order-events")?;
//! let dead_letters = connector.dead_letter_sink("order-events.dlq")?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod publisher;
mod source;

pub use publisher::{KafkaDeadLetterSink, KafkaEventPublisher};
pub use source::KafkaDeliverySource;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::FutureProducer;
use std::time::Duration;
use warehouse_core::broker::BrokerError;

/// Connection settings shared by every Kafka adapter.
///
/// # Example
///
/// ```no_run
/// use warehouse_redpanda::RedpandaConnector;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = RedpandaConnector::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .group_id("warehouse-batch")
///     .producer_acks("all")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct RedpandaConnector {
    brokers: String,
    group_id: String,
    producer_acks: String,
    compression: String,
    timeout: Duration,
    auto_offset_reset: String,
}

impl RedpandaConnector {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaConnectorBuilder {
        RedpandaConnectorBuilder::default()
    }

    /// Bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group id.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Create a consumer subscribed to `topic` with manual commits.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Setup`] if the consumer cannot be created or subscribed.
    pub fn subscribe(&self, topic: &str) -> Result<KafkaDeliverySource, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BrokerError::Setup(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Setup(format!("Failed to subscribe to '{topic}': {e}")))?;

        tracing::info!(
            topic,
            brokers = %self.brokers,
            group_id = %self.group_id,
            auto_offset_reset = %self.auto_offset_reset,
            manual_commit = true,
            "Subscribed to Kafka topic"
        );

        Ok(KafkaDeliverySource::new(consumer, self.timeout))
    }

    /// Create a publisher for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Setup`] if the producer cannot be created.
    pub fn publisher(&self, topic: &str) -> Result<KafkaEventPublisher, BrokerError> {
        Ok(KafkaEventPublisher::new(self.producer()?, topic, self.timeout))
    }

    /// Create a dead-letter sink writing to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Setup`] if the producer cannot be created.
    pub fn dead_letter_sink(&self, topic: &str) -> Result<KafkaDeadLetterSink, BrokerError> {
        Ok(KafkaDeadLetterSink::new(self.publisher(topic)?))
    }

    fn producer(&self) -> Result<FutureProducer, BrokerError> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", &self.producer_acks)
            .set("compression.type", &self.compression)
            .create()
            .map_err(|e| BrokerError::Setup(format!("Failed to create producer: {e}")))
    }
}

/// Builder for [`RedpandaConnector`].
#[derive(Default)]
pub struct RedpandaConnectorBuilder {
    brokers: Option<String>,
    group_id: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl RedpandaConnectorBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the consumer group id.
    ///
    /// Default: `"warehouse-batch"`
    #[must_use]
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"1"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout, also used for seeks.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set where a new consumer group starts reading.
    ///
    /// Default: `"earliest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaConnector`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Setup`] if no brokers were configured.
    pub fn build(self) -> Result<RedpandaConnector, BrokerError> {
        let brokers = self
            .brokers
            .filter(|brokers| !brokers.trim().is_empty())
            .ok_or_else(|| BrokerError::Setup("Brokers not configured".to_string()))?;

        Ok(RedpandaConnector {
            brokers,
            group_id: self.group_id.unwrap_or_else(|| "warehouse-batch".to_string()),
            producer_acks: self.producer_acks.unwrap_or_else(|| "1".to_string()),
            compression: self.compression.unwrap_or_else(|| "none".to_string()),
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn adapters_are_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<KafkaDeliverySource>();
        assert_send::<KafkaEventPublisher>();
        assert_sync::<KafkaEventPublisher>();
        assert_sync::<KafkaDeadLetterSink>();
    }

    #[test]
    fn builder_requires_brokers() {
        let err = RedpandaConnector::builder().build().unwrap_err();
        assert!(matches!(err, BrokerError::Setup(_)));

        let err = RedpandaConnector::builder().brokers("  ").build().unwrap_err();
        assert!(matches!(err, BrokerError::Setup(_)));
    }

    #[test]
    fn builder_defaults() {
        let connector = RedpandaConnector::builder()
            .brokers("localhost:9092")
            .build()
            .unwrap();

        assert_eq!(connector.brokers(), "localhost:9092");
        assert_eq!(connector.group_id(), "warehouse-batch");
        assert_eq!(connector.auto_offset_reset, "earliest");
        assert_eq!(connector.timeout, Duration::from_secs(5));
    }
}
