//! Demo traffic producer.
//!
//! Publishes a free-form `Hello Kafka at <RFC 3339>` payload, keyed `Key-<unix seconds>`,
//! once per interval. The strict Kafka consumer dead-letters these, which makes
//! the malformed-payload path visible in a local setup.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use warehouse_core::broker::EventPublisher;
use warehouse_core::environment::{Clock, SystemClock};

/// Periodic publisher of demo messages.
pub struct DemoProducer {
    publisher: Arc<dyn EventPublisher>,
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl DemoProducer {
    /// Creates a producer publishing through `publisher` every `interval`.
    #[must_use]
    pub fn new(publisher: Arc<dyn EventPublisher>, interval: Duration) -> Self {
        Self {
            publisher,
            interval,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used for payload text and keys.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publishes until `shutdown` is cancelled. Returns the number of messages sent.
    ///
    /// Publish failures are logged and the next tick tries again.
    pub async fn run(self, shutdown: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sent = 0;

        tracing::info!(interval_ms = self.interval.as_millis(), "Demo producer started");

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {},
            }

            let now = self.clock.now();
            let key = format!("Key-{}", now.timestamp());
            let payload = format!("Hello Kafka at {}", now.to_rfc3339());

            match self.publisher.publish_raw(&key, payload.as_bytes()).await {
                Ok(()) => {
                    sent += 1;
                    tracing::debug!(%key, "Demo message published");
                },
                Err(e) => tracing::warn!(%key, error = %e, "Demo message not published"),
            }
        }

        tracing::info!(sent, "Demo producer stopped");
        sent
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use warehouse_testing::{InMemoryBroker, test_clock};

    #[tokio::test(start_paused = true)]
    async fn publishes_on_each_tick_until_cancelled() {
        let broker = InMemoryBroker::new();
        let producer = DemoProducer::new(Arc::new(broker.clone()), Duration::from_secs(1))
            .with_clock(Arc::new(test_clock()));

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(producer.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        shutdown.cancel();
        let sent = task.await.unwrap();

        let published = broker.published();
        assert!(sent >= 2);
        assert_eq!(published.len() as u64, sent);

        let now = test_clock().now();
        assert_eq!(published[0].key, format!("Key-{}", now.timestamp()));
        assert_eq!(
            published[0].payload,
            format!("Hello Kafka at {}", now.to_rfc3339()).into_bytes()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_producer_sends_nothing() {
        let broker = InMemoryBroker::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let sent = DemoProducer::new(Arc::new(broker.clone()), Duration::from_secs(1))
            .run(shutdown)
            .await;

        assert_eq!(sent, 0);
        assert!(broker.published().is_empty());
    }
}
