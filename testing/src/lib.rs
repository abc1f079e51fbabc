//! # Warehouse Testing
//!
//! Test doubles and fixtures for the warehouse batch service.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: scripted broker with a [`DeliverySource`](warehouse_core::broker::DeliverySource)
//!   subscription and an [`EventPublisher`](warehouse_core::broker::EventPublisher)
//! - [`InMemoryDeadLetterSink`]: dead-letter records kept in memory
//! - [`RecordingActionHandler`]: records warehouse actions, fails on demand
//! - [`FixedClock`]: deterministic time
//! - [`fixtures`]: order and event builders
//!
//! ## Example
//!
//! ```
//! use warehouse_testing::{InMemoryBroker, fixtures};
//!
//! let broker = InMemoryBroker::new();
//! let id = broker.enqueue_event(&fixtures::event("order.created", "ord-1"));
//! assert_eq!(id, "msg-1");
//! assert_eq!(broker.pending(), 1);
//! ```

pub mod broker_mocks;
pub mod handler_mocks;

use chrono::{DateTime, Utc};
use warehouse_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use warehouse_testing::mocks::FixedClock;
    /// use warehouse_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Order and event builders.
pub mod fixtures {
    use crate::mocks::test_clock;
    use rust_decimal::Decimal;
    use warehouse_core::environment::Clock;
    use warehouse_core::{Order, OrderEvent};

    /// A fully populated order with the given id and status.
    #[must_use]
    pub fn order(id: &str, status: &str) -> Order {
        let at = test_clock().now();
        Order {
            id: id.to_string(),
            customer_id: "cust-1".to_string(),
            product_id: "sku-42".to_string(),
            quantity: 3,
            status: status.to_string(),
            total_amount: Decimal::new(5997, 2),
            created_at: at,
            updated_at: at,
        }
    }

    /// An event of `event_type` for order `order_id` in status `created`.
    #[must_use]
    pub fn event(event_type: &str, order_id: &str) -> OrderEvent {
        event_with_status(event_type, order_id, "created")
    }

    /// An event of `event_type` whose order carries `status`.
    #[must_use]
    pub fn event_with_status(event_type: &str, order_id: &str, status: &str) -> OrderEvent {
        OrderEvent::new(event_type, order(order_id, status), test_clock().now())
    }
}

/// Test helpers.
pub mod helpers {
    /// Install a `fmt` subscriber honouring `RUST_LOG`, once per process.
    ///
    /// Later calls are no-ops.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use broker_mocks::{InMemoryBroker, InMemoryDeadLetterSink, InMemoryDeliverySource, Release};
pub use handler_mocks::{RecordedCall, RecordingActionHandler};
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use warehouse_core::broker::{BrokerError, DeliverySource};

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_broker_times_out() {
        let broker = InMemoryBroker::new();
        let mut source = broker.subscribe();
        let pulled = source.pull_next(Duration::from_secs(10)).await.unwrap();
        assert!(pulled.is_none());
    }

    #[tokio::test]
    async fn requeue_redelivers_same_message() {
        let broker = InMemoryBroker::new();
        let id = broker.enqueue("k", b"payload".to_vec());
        let mut source = broker.subscribe();

        let first = source.pull_next(Duration::from_secs(1)).await.unwrap().unwrap();
        assert!(!first.redelivered);
        source.nack(first.handle, true).await.unwrap();

        let second = source.pull_next(Duration::from_secs(1)).await.unwrap().unwrap();
        assert!(second.redelivered);
        assert_eq!(second.key, id);
        assert_ne!(second.handle, first.handle);
        source.ack(second.handle).await.unwrap();

        assert_eq!(
            broker.releases(),
            vec![Release::Requeued(id.clone()), Release::Acked(id)]
        );
    }

    #[tokio::test]
    async fn stale_handle_is_rejected() {
        let broker = InMemoryBroker::new();
        broker.enqueue("k", b"payload".to_vec());
        let mut source = broker.subscribe();

        let delivery = source.pull_next(Duration::from_secs(1)).await.unwrap().unwrap();
        source.ack(delivery.handle).await.unwrap();

        let err = source.ack(delivery.handle).await.unwrap_err();
        assert_eq!(err, BrokerError::UnknownDelivery(delivery.handle));
    }

    #[tokio::test]
    async fn drained_broker_reports_closed() {
        let broker = InMemoryBroker::new();
        broker.close_when_drained();
        let mut source = broker.subscribe();
        let err = source.pull_next(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, BrokerError::Closed(_)));
    }

    #[tokio::test]
    async fn recording_handler_fails_on_demand() {
        use warehouse_core::handler::WarehouseActionHandler;

        let handler = RecordingActionHandler::new();
        handler.fail_next(1);
        let event = fixtures::event("order.created", "ord-1");

        assert!(handler.allocate_inventory(&event).await.is_err());
        assert!(handler.allocate_inventory(&event).await.is_ok());
        assert_eq!(handler.calls().len(), 2);
    }
}
