//! # Warehouse Batch
//!
//! Service wiring for the warehouse order-event consumer:
//!
//! - [`config`]: environment configuration
//! - [`telemetry`]: tracing subscriber
//! - [`http`]: `/health` and `/metrics`
//! - [`demo`]: optional demo traffic producer
//!
//! The binary connects the Kafka channel (strict translation, dead-letter topic)
//! and, when enabled, the legacy RabbitMQ queue (lenient translation), and runs
//! one consumer task per channel until SIGINT or SIGTERM.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod demo;
pub mod http;
pub mod telemetry;

pub use config::{ConfigError, ServiceConfig};
pub use demo::DemoProducer;
