//! Kafka delivery source.

use async_trait::async_trait;
use rdkafka::Offset;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::topic_partition_list::TopicPartitionList;
use std::time::Duration;
use warehouse_core::broker::{BrokerError, Delivery, DeliveryHandle, DeliverySource};

#[derive(Debug)]
struct InFlight {
    handle: DeliveryHandle,
    topic: String,
    partition: i32,
    offset: i64,
    key: String,
}

/// [`DeliverySource`] over an rdkafka `StreamConsumer`.
///
/// Holds at most one delivery in flight. The delivery key is
/// `<topic>/<partition>/<offset>`, which a seek-based requeue preserves.
/// A requeue whose seek failed is retried before the next `recv()`, so no later
/// offset is consumed (or committed) past it.
pub struct KafkaDeliverySource {
    consumer: StreamConsumer,
    seek_timeout: Duration,
    in_flight: Option<InFlight>,
    pending_seek: Option<InFlight>,
    last_requeued: Option<String>,
    next_sequence: u64,
    closed: bool,
}

impl KafkaDeliverySource {
    pub(crate) const fn new(consumer: StreamConsumer, seek_timeout: Duration) -> Self {
        Self {
            consumer,
            seek_timeout,
            in_flight: None,
            pending_seek: None,
            last_requeued: None,
            next_sequence: 0,
            closed: false,
        }
    }

    fn take_in_flight(&mut self, handle: DeliveryHandle) -> Result<InFlight, BrokerError> {
        match self.in_flight.take() {
            Some(in_flight) if in_flight.handle == handle => Ok(in_flight),
            other => {
                self.in_flight = other;
                Err(BrokerError::UnknownDelivery(handle))
            },
        }
    }

    fn seek_back(&mut self, in_flight: InFlight) -> Result<(), BrokerError> {
        match self.consumer.seek(
            &in_flight.topic,
            in_flight.partition,
            Offset::Offset(in_flight.offset),
            self.seek_timeout,
        ) {
            Ok(()) => {
                self.last_requeued = Some(in_flight.key);
                Ok(())
            },
            Err(e) => {
                tracing::warn!(
                    key = %in_flight.key,
                    error = %e,
                    "Seek for requeue failed, will retry"
                );
                self.pending_seek = Some(in_flight);
                Err(map_kafka_error(e))
            },
        }
    }

    fn commit_past(&self, in_flight: &InFlight) -> Result<(), BrokerError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &in_flight.topic,
                in_flight.partition,
                Offset::Offset(in_flight.offset + 1),
            )
            .map_err(map_kafka_error)?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(map_kafka_error)
    }
}

/// Message identity that survives redelivery.
pub(crate) fn delivery_key(topic: &str, partition: i32, offset: i64) -> String {
    format!("{topic}/{partition}/{offset}")
}

/// Every client-side Kafka failure is treated as transient; setup failures are
/// reported by the connector before a source exists.
pub(crate) fn map_kafka_error(error: KafkaError) -> BrokerError {
    BrokerError::Transient(error.to_string())
}

#[async_trait]
impl DeliverySource for KafkaDeliverySource {
    async fn pull_next(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed("consumer unsubscribed".to_string()));
        }

        if let Some(requeued) = self.pending_seek.take() {
            self.seek_back(requeued)?;
        }

        let message = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_elapsed) => return Ok(None),
            Ok(Err(e)) => return Err(map_kafka_error(e)),
            Ok(Ok(message)) => message,
        };

        let topic = message.topic().to_string();
        let partition = message.partition();
        let offset = message.offset();
        let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
        drop(message);

        let key = delivery_key(&topic, partition, offset);
        let redelivered = self.last_requeued.as_deref() == Some(key.as_str());
        if redelivered {
            self.last_requeued = None;
        }

        self.next_sequence += 1;
        let handle = DeliveryHandle::new(self.next_sequence);

        tracing::trace!(%key, bytes = payload.len(), redelivered, "Received Kafka message");

        self.in_flight = Some(InFlight {
            handle,
            topic,
            partition,
            offset,
            key: key.clone(),
        });

        Ok(Some(Delivery {
            payload,
            handle,
            key,
            redelivered,
        }))
    }

    async fn ack(&mut self, handle: DeliveryHandle) -> Result<(), BrokerError> {
        let in_flight = self.take_in_flight(handle)?;
        self.commit_past(&in_flight)
    }

    async fn nack(&mut self, handle: DeliveryHandle, requeue: bool) -> Result<(), BrokerError> {
        let in_flight = self.take_in_flight(handle)?;

        if !requeue {
            return self.commit_past(&in_flight);
        }

        self.seek_back(in_flight)
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if !self.closed {
            self.consumer.unsubscribe();
            self.closed = true;
            tracing::info!("Kafka consumer unsubscribed");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::RedpandaConnector;
    use rdkafka::types::RDKafkaErrorCode;

    fn unassigned_source() -> KafkaDeliverySource {
        RedpandaConnector::builder()
            .brokers("127.0.0.1:1")
            .build()
            .unwrap()
            .subscribe("order-events")
            .unwrap()
    }

    fn in_flight(offset: i64) -> InFlight {
        InFlight {
            handle: DeliveryHandle::new(1),
            topic: "order-events".to_string(),
            partition: 0,
            offset,
            key: delivery_key("order-events", 0, offset),
        }
    }

    #[tokio::test]
    async fn failed_requeue_seek_is_retried_before_the_next_pull() {
        let mut source = unassigned_source();
        source.in_flight = Some(in_flight(7));

        // The partition is not assigned, so the seek cannot succeed.
        let err = source.nack(DeliveryHandle::new(1), true).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(source.pending_seek.as_ref().map(|f| f.offset), Some(7));

        let err = source.pull_next(Duration::from_secs(5)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(source.pending_seek.as_ref().map(|f| f.offset), Some(7));
        assert!(source.last_requeued.is_none());
    }

    #[test]
    fn key_is_topic_partition_offset() {
        assert_eq!(delivery_key("order-events", 2, 41), "order-events/2/41");
    }

    #[test]
    fn consumption_errors_are_transient() {
        let err = map_kafka_error(KafkaError::MessageConsumption(
            RDKafkaErrorCode::BrokerTransportFailure,
        ));
        assert!(err.is_transient());
    }
}
