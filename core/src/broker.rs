//! Message broker ports.
//!
//! The pipeline talks to brokers only through these traits. Adapters live in their
//! own crates (`warehouse-redpanda`, `warehouse-amqp`) and an in-memory broker lives
//! in `warehouse-testing`.
//!
//! # Delivery contract
//!
//! - [`DeliverySource::pull_next`] yields at most one [`Delivery`] at a time.
//! - Every delivery is released exactly once, with [`DeliverySource::ack`] or
//!   [`DeliverySource::nack`]; the [`DeliveryHandle`] is consumed by the call.
//! - A delivery that is never released is redelivered by the broker
//!   (at-least-once).
//! - A source is owned by exactly one consumer for its whole life and is never
//!   shared across workers.

use crate::order::OrderEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by broker adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Connectivity or coordination problem that is expected to clear on its own
    #[error("Transient broker error: {0}")]
    Transient(String),

    /// Connection or topology declaration failed at startup
    #[error("Broker setup failed: {0}")]
    Setup(String),

    /// The subscription was closed by the broker or by a previous `close()`
    #[error("Subscription closed: {0}")]
    Closed(String),

    /// Publish failed
    #[error("Publish failed for '{destination}': {reason}")]
    PublishFailed {
        /// Topic, queue or exchange
        destination: String,
        /// Broker diagnostic
        reason: String,
    },

    /// Handle does not belong to the delivery currently in flight
    #[error("Unknown delivery handle {0}")]
    UnknownDelivery(DeliveryHandle),
}

impl BrokerError {
    /// Whether the consumer should back off and keep going rather than stop.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::PublishFailed { .. })
    }
}

/// Opaque acknowledgment token for one delivery.
///
/// Adapters map the sequence number back to their native token (Kafka offset,
/// AMQP delivery tag).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeliveryHandle(u64);

impl DeliveryHandle {
    /// Wraps an adapter-assigned sequence number.
    #[must_use]
    pub const fn new(sequence: u64) -> Self {
        Self(sequence)
    }

    /// The adapter-assigned sequence number.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One message pulled from a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Token used to release the delivery
    pub handle: DeliveryHandle,
    /// Stable identity of the underlying message, identical across redeliveries
    pub key: String,
    /// Broker reported this as a redelivery
    pub redelivered: bool,
}

/// Pull-based subscription with explicit acknowledgment.
#[async_trait]
pub trait DeliverySource: Send {
    /// Waits up to `timeout` for the next delivery. `Ok(None)` means the timeout elapsed.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Transient`] for recoverable broker problems and
    /// [`BrokerError::Closed`] once the subscription is gone.
    async fn pull_next(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// Positively acknowledges a delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker rejects or cannot receive the acknowledgment.
    async fn ack(&mut self, handle: DeliveryHandle) -> Result<(), BrokerError>;

    /// Negatively acknowledges a delivery, asking for redelivery when `requeue` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker rejects or cannot receive the acknowledgment.
    async fn nack(&mut self, handle: DeliveryHandle, requeue: bool) -> Result<(), BrokerError>;

    /// Drains and closes the subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker connection cannot be closed cleanly.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Outbound side of a channel.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes an order event in its JSON wire shape.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the broker does not accept the message.
    async fn publish(&self, event: &OrderEvent) -> Result<(), BrokerError>;

    /// Publishes an arbitrary payload under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the broker does not accept the message.
    async fn publish_raw(&self, key: &str, payload: &[u8]) -> Result<(), BrokerError>;
}

/// Why a delivery was dead-lettered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Payload could not be translated on a strict channel
    Malformed,
    /// Processing kept failing until the redelivery cap was reached
    RetriesExhausted,
}

/// Envelope written to a dead-letter destination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Name of the consumer that gave up on the message
    pub consumer: String,
    /// Message identity ([`Delivery::key`])
    pub message_key: String,
    /// Original payload bytes, base64 in the JSON form
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Failure category
    pub reason: DeadLetterReason,
    /// Last error message
    pub error: String,
    /// Number of failed processing attempts
    pub attempts: u32,
    /// When the message was dead-lettered
    pub failed_at: DateTime<Utc>,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Destination for messages the consumer will not retry.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Stores a dead-letter record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be stored; the consumer then keeps
    /// the message on the broker instead of discarding it.
    async fn dead_letter(&self, record: &DeadLetterRecord) -> Result<(), BrokerError>;
}
