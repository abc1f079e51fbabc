//! Kafka publisher and dead-letter sink.

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use warehouse_core::OrderEvent;
use warehouse_core::broker::{BrokerError, DeadLetterRecord, DeadLetterSink, EventPublisher};
use warehouse_core::translator;
use warehouse_runtime::metrics::PublisherMetrics;

/// [`EventPublisher`] writing to one Kafka topic.
///
/// Events are keyed by order id so all events of one order share a partition.
#[derive(Clone)]
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaEventPublisher {
    pub(crate) fn new(producer: FutureProducer, topic: &str, timeout: Duration) -> Self {
        Self {
            producer,
            topic: topic.to_string(),
            timeout,
        }
    }

    /// Destination topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, key: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let record = FutureRecord::to(&self.topic).payload(payload).key(key);

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                tracing::debug!(
                    topic = %self.topic,
                    partition,
                    offset,
                    key,
                    "Message published"
                );
                PublisherMetrics::record_publish(&self.topic);
                Ok(())
            },
            Err((kafka_error, _)) => {
                tracing::error!(
                    topic = %self.topic,
                    key,
                    error = %kafka_error,
                    "Failed to publish message"
                );
                PublisherMetrics::record_publish_error(&self.topic);
                Err(BrokerError::PublishFailed {
                    destination: self.topic.clone(),
                    reason: kafka_error.to_string(),
                })
            },
        }
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), BrokerError> {
        let payload = translator::encode(event).map_err(|e| BrokerError::PublishFailed {
            destination: self.topic.clone(),
            reason: e.to_string(),
        })?;
        self.send(&event.order_id, &payload).await
    }

    async fn publish_raw(&self, key: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.send(key, payload).await
    }
}

/// [`DeadLetterSink`] publishing JSON [`DeadLetterRecord`]s to a Kafka topic.
#[derive(Clone)]
pub struct KafkaDeadLetterSink {
    publisher: KafkaEventPublisher,
}

impl KafkaDeadLetterSink {
    pub(crate) const fn new(publisher: KafkaEventPublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn dead_letter(&self, record: &DeadLetterRecord) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(record).map_err(|e| BrokerError::PublishFailed {
            destination: self.publisher.topic.clone(),
            reason: format!("Failed to serialize dead-letter record: {e}"),
        })?;

        self.publisher.send(&record.message_key, &payload).await?;
        tracing::warn!(
            topic = %self.publisher.topic,
            key = %record.message_key,
            reason = ?record.reason,
            attempts = record.attempts,
            "Message dead-lettered"
        );
        Ok(())
    }
}
