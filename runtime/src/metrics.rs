//! Prometheus metrics for the consumer pipeline.
//!
//! Counters recorded here:
//! - Deliveries pulled and their final disposition, per consumer
//! - Transient broker errors, per consumer
//! - Translation fallbacks on lenient channels
//! - Published and failed outbound messages, per destination
//!
//! The processor in `warehouse-core` records `warehouse_events_skipped_total` and
//! `warehouse_actions_dispatched_total`; their descriptions are registered here too.
//!
//! # Example
//!
//! ```rust,no_run
//! use warehouse_runtime::metrics::install_prometheus;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = install_prometheus()?;
//! // Serve `handle.render()` from the HTTP `/metrics` route.
//! # Ok(())
//! # }
//! ```

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::counter;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the global Prometheus recorder and registers metric descriptions.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a recorder is already installed. Call this
/// once, from the binary.
pub fn install_prometheus() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_metrics();
    tracing::info!("Prometheus recorder installed");
    Ok(handle)
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Consumer
    describe_counter!(
        "warehouse_consumer_deliveries_total",
        "Total number of deliveries pulled from a broker"
    );
    describe_counter!(
        "warehouse_consumer_dispositions_total",
        "Final disposition of each delivery (ack, requeue, discard, dead_letter)"
    );
    describe_counter!(
        "warehouse_consumer_transient_errors_total",
        "Total number of transient broker errors seen by a consumer"
    );
    describe_counter!(
        "warehouse_translation_fallbacks_total",
        "Payloads replaced by the fallback event on lenient channels"
    );

    // Processor
    describe_counter!(
        "warehouse_events_skipped_total",
        "Events skipped because they are not warehouse-relevant"
    );
    describe_counter!(
        "warehouse_actions_dispatched_total",
        "Warehouse actions dispatched to the action handler"
    );

    // Publisher
    describe_counter!(
        "warehouse_messages_published_total",
        "Total number of messages published"
    );
    describe_counter!(
        "warehouse_publish_errors_total",
        "Total number of failed publishes"
    );
}

/// Consumer metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a delivery pulled by `consumer`.
    pub fn record_delivery(consumer: &str) {
        counter!("warehouse_consumer_deliveries_total", "consumer" => consumer.to_string())
            .increment(1);
    }

    /// Record the final disposition of a delivery.
    pub fn record_disposition(consumer: &str, disposition: &'static str) {
        counter!(
            "warehouse_consumer_dispositions_total",
            "consumer" => consumer.to_string(),
            "disposition" => disposition
        )
        .increment(1);
    }

    /// Record a transient broker error.
    pub fn record_transient_error(consumer: &str) {
        counter!("warehouse_consumer_transient_errors_total", "consumer" => consumer.to_string())
            .increment(1);
    }

    /// Record a lenient translation fallback.
    pub fn record_fallback(consumer: &str) {
        counter!("warehouse_translation_fallbacks_total", "consumer" => consumer.to_string())
            .increment(1);
    }
}

/// Publisher metrics recorder.
pub struct PublisherMetrics;

impl PublisherMetrics {
    /// Record a successful publish.
    pub fn record_publish(destination: &str) {
        counter!("warehouse_messages_published_total", "destination" => destination.to_string())
            .increment(1);
    }

    /// Record a failed publish.
    pub fn record_publish_error(destination: &str) {
        counter!("warehouse_publish_errors_total", "destination" => destination.to_string())
            .increment(1);
    }
}
