//! Service configuration.
//!
//! Loaded once at startup from environment variables. Every variable has a
//! default; a variable that is set but does not parse is a [`ConfigError`].

use std::time::Duration;
use thiserror::Error;
use warehouse_amqp::AmqpSettings;
use warehouse_runtime::{BackoffPolicy, ConsumerConfig};

/// Configuration errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set to a value that does not parse
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// What was expected
        reason: &'static str,
    },
}

/// Kafka settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Bootstrap servers (`KAFKA_BROKER_ADDRESS`)
    pub brokers: String,
    /// Order event topic (`KAFKA_TOPIC`)
    pub topic: String,
    /// Consumer group (`KAFKA_GROUP_ID`)
    pub group_id: String,
    /// Dead-letter topic (`KAFKA_DLQ_TOPIC`, defaults to `<topic>.dlq`)
    pub dlq_topic: String,
}

/// RabbitMQ settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RabbitMqConfig {
    /// Whether the legacy queue is consumed (`RABBITMQ_ENABLED`)
    pub enabled: bool,
    /// Connection and topology
    pub settings: AmqpSettings,
}

/// Consumer loop tuning shared by both channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerTuning {
    /// `CONSUMER_PULL_TIMEOUT_SECS`
    pub pull_timeout: Duration,
    /// `CONSUMER_BACKOFF_SECS`
    pub backoff: Duration,
    /// `CONSUMER_MAX_REDELIVERIES`
    pub max_redeliveries: u32,
}

/// Demo producer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoConfig {
    /// `DEMO_PRODUCER_ENABLED`
    pub enabled: bool,
    /// `DEMO_INTERVAL_MS`
    pub interval: Duration,
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Kafka settings
    pub kafka: KafkaConfig,
    /// RabbitMQ settings
    pub rabbitmq: RabbitMqConfig,
    /// Port for `/health` and `/metrics` (`HTTP_PORT`)
    pub http_port: u16,
    /// Consumer loop tuning
    pub consumer: ConsumerTuning,
    /// How long main waits for tasks after shutdown starts (`SHUTDOWN_GRACE_SECS`)
    pub shutdown_grace: Duration,
    /// Demo producer settings
    pub demo: DemoConfig,
}

impl ServiceConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric or boolean variable is set to
    /// something that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Loads configuration through `lookup`, which returns a variable's value if set.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let defaults = AmqpSettings::default();

        let topic = env.string("KAFKA_TOPIC", "order-events");
        let dlq_topic = env.string("KAFKA_DLQ_TOPIC", &format!("{topic}.dlq"));

        Ok(Self {
            kafka: KafkaConfig {
                brokers: env.string("KAFKA_BROKER_ADDRESS", "localhost:9092"),
                group_id: env.string("KAFKA_GROUP_ID", "warehouse-batch"),
                topic,
                dlq_topic,
            },
            rabbitmq: RabbitMqConfig {
                enabled: env.flag("RABBITMQ_ENABLED", false)?,
                settings: AmqpSettings {
                    url: env.string("RABBITMQ_URL", &defaults.url),
                    exchange: env.string("RABBITMQ_EXCHANGE", &defaults.exchange),
                    queue: env.string("RABBITMQ_QUEUE", &defaults.queue),
                    routing_key: env.string("RABBITMQ_ROUTING_KEY", &defaults.routing_key),
                    prefetch_count: env.number("RABBITMQ_PREFETCH", defaults.prefetch_count)?,
                },
            },
            http_port: env.number("HTTP_PORT", 8080)?,
            consumer: ConsumerTuning {
                pull_timeout: Duration::from_secs(env.number("CONSUMER_PULL_TIMEOUT_SECS", 10)?),
                backoff: Duration::from_secs(env.number("CONSUMER_BACKOFF_SECS", 5)?),
                max_redeliveries: env.number("CONSUMER_MAX_REDELIVERIES", 5)?,
            },
            shutdown_grace: Duration::from_secs(env.number("SHUTDOWN_GRACE_SECS", 5)?),
            demo: DemoConfig {
                enabled: env.flag("DEMO_PRODUCER_ENABLED", false)?,
                interval: Duration::from_millis(env.number("DEMO_INTERVAL_MS", 1000)?),
            },
        })
    }

    /// Consumer loop configuration for the channel called `name`.
    #[must_use]
    pub fn consumer_config(&self, name: &str) -> ConsumerConfig {
        ConsumerConfig::new(name)
            .with_pull_timeout(self.consumer.pull_timeout)
            .with_backoff(BackoffPolicy::fixed(self.consumer.backoff))
            .with_max_redeliveries(self.consumer.max_redeliveries)
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, var: &str, default: &str) -> String {
        (self.0)(var)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn number<T: std::str::FromStr>(
        &self,
        var: &'static str,
        default: T,
    ) -> Result<T, ConfigError> {
        match (self.0)(var).filter(|value| !value.is_empty()) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                var,
                value,
                reason: "expected a non-negative integer",
            }),
        }
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match (self.0)(var).filter(|value| !value.is_empty()) {
            None => Ok(default),
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    var,
                    value,
                    reason: "expected true or false",
                }),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.kafka.brokers, "localhost:9092");
        assert_eq!(config.kafka.topic, "order-events");
        assert_eq!(config.kafka.group_id, "warehouse-batch");
        assert_eq!(config.kafka.dlq_topic, "order-events.dlq");
        assert!(!config.rabbitmq.enabled);
        assert_eq!(config.rabbitmq.settings, AmqpSettings::default());
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.consumer.pull_timeout, Duration::from_secs(10));
        assert_eq!(config.consumer.backoff, Duration::from_secs(5));
        assert_eq!(config.consumer.max_redeliveries, 5);
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert!(!config.demo.enabled);
        assert_eq!(config.demo.interval, Duration::from_millis(1000));
    }

    #[test]
    fn dlq_topic_follows_topic() {
        let config = load(&[("KAFKA_TOPIC", "orders")]).unwrap();
        assert_eq!(config.kafka.dlq_topic, "orders.dlq");

        let config = load(&[("KAFKA_TOPIC", "orders"), ("KAFKA_DLQ_TOPIC", "dead")]).unwrap();
        assert_eq!(config.kafka.dlq_topic, "dead");
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("RABBITMQ_ENABLED", "true"),
            ("RABBITMQ_QUEUE", "legacy"),
            ("RABBITMQ_PREFETCH", "10"),
            ("HTTP_PORT", "9000"),
            ("CONSUMER_MAX_REDELIVERIES", "0"),
            ("DEMO_PRODUCER_ENABLED", "1"),
            ("DEMO_INTERVAL_MS", "250"),
        ])
        .unwrap();

        assert!(config.rabbitmq.enabled);
        assert_eq!(config.rabbitmq.settings.queue, "legacy");
        assert_eq!(config.rabbitmq.settings.prefetch_count, 10);
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.consumer.max_redeliveries, 0);
        assert!(config.demo.enabled);
        assert_eq!(config.demo.interval, Duration::from_millis(250));
    }

    #[test]
    fn empty_values_use_defaults() {
        let config = load(&[("KAFKA_TOPIC", ""), ("HTTP_PORT", "")]).unwrap();
        assert_eq!(config.kafka.topic, "order-events");
        assert_eq!(config.http_port, 8080);
    }

    #[test]
    fn invalid_number_is_rejected() {
        let err = load(&[("HTTP_PORT", "eighty")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "HTTP_PORT",
                value: "eighty".to_string(),
                reason: "expected a non-negative integer",
            }
        );

        assert!(load(&[("CONSUMER_BACKOFF_SECS", "-1")]).is_err());
    }

    #[test]
    fn invalid_flag_is_rejected() {
        let err = load(&[("RABBITMQ_ENABLED", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("RABBITMQ_ENABLED"));
    }

    #[test]
    fn consumer_config_uses_tuning() {
        let config = load(&[("CONSUMER_PULL_TIMEOUT_SECS", "3"), ("CONSUMER_BACKOFF_SECS", "2")])
            .unwrap();
        let consumer = config.consumer_config("kafka");

        assert_eq!(consumer.name, "kafka");
        assert_eq!(consumer.pull_timeout, Duration::from_secs(3));
        assert_eq!(consumer.backoff.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(consumer.max_redeliveries, 5);
    }
}
