//! RabbitMQ publisher.

use crate::{AmqpSettings, declare_topology, open};
use amqprs::BasicProperties;
use amqprs::channel::{BasicPublishArguments, Channel};
use amqprs::connection::Connection;
use async_trait::async_trait;
use warehouse_core::OrderEvent;
use warehouse_core::broker::{BrokerError, EventPublisher};
use warehouse_core::translator;
use warehouse_runtime::metrics::PublisherMetrics;

/// [`EventPublisher`] writing persistent messages to the exchange.
///
/// [`publish`](EventPublisher::publish) routes by event type and labels the
/// message `application/json`; [`publish_raw`](EventPublisher::publish_raw)
/// uses the configured routing key, sends `key` as the message id and leaves the
/// content type unset.
pub struct AmqpEventPublisher {
    exchange: String,
    routing_key: String,
    channel: Channel,
    // Dropping the connection closes the channel.
    _connection: Connection,
}

impl AmqpEventPublisher {
    /// Connects and declares the topology.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Transient`] if the server cannot be reached and
    /// [`BrokerError::Setup`] if the URL is invalid or declaration fails.
    pub async fn connect(settings: &AmqpSettings) -> Result<Self, BrokerError> {
        let (connection, channel) = open(settings).await?;
        declare_topology(&channel, settings).await?;

        Ok(Self {
            exchange: settings.exchange.clone(),
            routing_key: settings.routing_key.clone(),
            channel,
            _connection: connection,
        })
    }

    async fn send(
        &self,
        routing_key: &str,
        message_id: &str,
        content_type: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let properties = message_properties(message_id, content_type);

        match self
            .channel
            .basic_publish(
                properties,
                payload,
                BasicPublishArguments::new(&self.exchange, routing_key),
            )
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    exchange = %self.exchange,
                    routing_key,
                    message_id,
                    "Message published"
                );
                PublisherMetrics::record_publish(&self.exchange);
                Ok(())
            },
            Err(e) => {
                tracing::error!(
                    exchange = %self.exchange,
                    routing_key,
                    error = %e,
                    "Failed to publish message"
                );
                PublisherMetrics::record_publish_error(&self.exchange);
                Err(BrokerError::PublishFailed {
                    destination: self.exchange.clone(),
                    reason: e.to_string(),
                })
            },
        }
    }
}

/// Persistent delivery with the given message id and optional content type.
pub(crate) fn message_properties(message_id: &str, content_type: Option<&str>) -> BasicProperties {
    let mut properties = BasicProperties::default();
    properties.with_delivery_mode(2).with_message_id(message_id);
    if let Some(content_type) = content_type {
        properties.with_content_type(content_type);
    }
    properties
}

/// Message id for an event: unique per order and emission time.
pub(crate) fn event_message_id(event: &OrderEvent) -> String {
    format!(
        "{}-{}",
        event.order_id,
        event.timestamp.timestamp_nanos_opt().unwrap_or_default()
    )
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), BrokerError> {
        let payload = translator::encode(event).map_err(|e| BrokerError::PublishFailed {
            destination: self.exchange.clone(),
            reason: e.to_string(),
        })?;
        self.send(
            &event.event_type,
            &event_message_id(event),
            Some("application/json"),
            payload,
        )
        .await
    }

    async fn publish_raw(&self, key: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.send(&self.routing_key, key, None, payload.to_vec())
            .await
    }
}
