//! # Warehouse Runtime
//!
//! Drives order events from a broker subscription into the processor.
//!
//! - [`consumer`]: [`ReliableConsumer`], the pull/translate/process/release loop
//! - [`retry`]: [`BackoffPolicy`] and connection retry helpers
//! - [`metrics`]: Prometheus recorder and metric descriptions
//!
//! Each consumer owns its [`DeliverySource`](warehouse_core::broker::DeliverySource)
//! and runs on its own task. Shutdown is cooperative: cancel the token passed to
//! [`ReliableConsumer::run`] and await the task.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consumer;
pub mod metrics;
pub mod retry;

pub use consumer::{ConsumerConfig, ConsumerReport, Disposition, ReliableConsumer};
pub use retry::BackoffPolicy;
