//! # Warehouse Core
//!
//! Order event model, classification and processing for the warehouse batch service.
//!
//! ## Pipeline
//!
//! ```text
//! broker ──► MessageTranslator ──► EventProcessor ──► WarehouseActionHandler
//!  (bytes)      (OrderEvent)        (relevance gate,     (one method per
//!                                    action routing)      warehouse action)
//! ```
//!
//! - [`order`]: the [`OrderEvent`](order::OrderEvent) value consumed by the pipeline
//! - [`routing`]: relevance set and the event type → action table
//! - [`translator`]: strict and lenient payload translation
//! - [`processor`]: relevance gate and handler dispatch
//! - [`handler`]: the warehouse action port and its logging stub
//! - [`broker`]: delivery, publish and dead-letter ports implemented by adapters
//!
//! ## Example
//!
//! ```
//! use warehouse_core::handler::LoggingActionHandler;
//! use warehouse_core::processor::{EventProcessor, ProcessOutcome};
//! use warehouse_core::routing::WarehouseAction;
//! use warehouse_core::translator::MessageTranslator;
//!
//! # tokio_test::block_on(async {
//! let translator = MessageTranslator::strict();
//! let processor = EventProcessor::new(LoggingActionHandler);
//!
//! let translated = translator
//!     .translate(br#"{"event_type":"order.created","order_id":"ord-1"}"#)
//!     .unwrap();
//! let outcome = processor.process(&translated.event).await.unwrap();
//!
//! assert_eq!(outcome, ProcessOutcome::Dispatched(WarehouseAction::AllocateInventory));
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod handler;
pub mod order;
pub mod processor;
pub mod routing;
pub mod translator;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use order::{Order, OrderEvent};
pub use routing::{WarehouseAction, WarehouseEventType};

/// Environment module - injected dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Production code uses [`SystemClock`]; tests use a fixed clock so fallback
    /// events get deterministic timestamps.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
