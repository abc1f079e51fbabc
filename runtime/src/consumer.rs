//! Reliable consumer loop.
//!
//! One [`ReliableConsumer`] owns one [`DeliverySource`] and runs until its
//! cancellation token fires or the subscription closes:
//!
//! ```text
//! loop:
//!   pull_next(timeout) ─┬─ Some(delivery) ─► translate ─► process ─► release
//!                       ├─ None ──────────► pull again
//!                       ├─ Closed ────────► stop
//!                       └─ other error ───► back off, pull again
//! ```
//!
//! # Release rules
//!
//! | Outcome                                   | Release                        |
//! |-------------------------------------------|--------------------------------|
//! | processed or skipped                      | ack                            |
//! | payload malformed (strict channel)        | dead-letter if a sink is set, then nack without requeue |
//! | processing failed, attempts ≤ cap         | nack with requeue              |
//! | processing failed, attempts > cap         | dead-letter, then nack without requeue |
//!
//! Attempts are counted per [`Delivery::key`], which stays stable across
//! redeliveries. A failed ack/nack or dead-letter write backs off like a failed
//! pull. A delivery that has already been pulled is always released
//! before the loop observes cancellation.

use crate::metrics::ConsumerMetrics;
use crate::retry::BackoffPolicy;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use warehouse_core::broker::{
    BrokerError, DeadLetterReason, DeadLetterRecord, DeadLetterSink, Delivery, DeliverySource,
};
use warehouse_core::environment::{Clock, SystemClock};
use warehouse_core::handler::WarehouseActionHandler;
use warehouse_core::processor::EventProcessor;
use warehouse_core::translator::{MessageTranslator, TranslationOutcome};

/// Upper bound on keys tracked in the attempt ledger before it is reset.
const MAX_TRACKED_KEYS: usize = 10_000;

/// Consumer configuration.
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    /// Name used in logs, metrics and dead-letter records
    pub name: String,
    /// How long one pull waits for a delivery
    pub pull_timeout: Duration,
    /// Delay policy after transient broker errors
    pub backoff: BackoffPolicy,
    /// Redeliveries allowed before a failing message is dead-lettered
    pub max_redeliveries: u32,
}

impl ConsumerConfig {
    /// Defaults: 10s pull timeout, fixed 5s backoff, 5 redeliveries.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pull_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::fixed(Duration::from_secs(5)),
            max_redeliveries: 5,
        }
    }

    /// Sets the pull timeout.
    #[must_use]
    pub const fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    /// Sets the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the redelivery cap.
    #[must_use]
    pub const fn with_max_redeliveries(mut self, max_redeliveries: u32) -> Self {
        self.max_redeliveries = max_redeliveries;
        self
    }
}

/// How a delivery was released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Positively acknowledged
    Ack,
    /// Returned to the broker for redelivery
    Requeue,
    /// Dropped without a dead-letter record
    Discard,
    /// Written to the dead-letter sink, then dropped
    DeadLetter(DeadLetterReason),
}

impl Disposition {
    /// Metric and log token.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Requeue => "requeue",
            Self::Discard => "discard",
            Self::DeadLetter(_) => "dead_letter",
        }
    }
}

/// Disposition after the `attempts`-th processing failure of one message.
///
/// The first delivery plus `max_redeliveries` redeliveries are allowed; the
/// failure after that is final.
#[must_use]
pub const fn disposition_for_failure(attempts: u32, max_redeliveries: u32) -> Disposition {
    if attempts > max_redeliveries {
        Disposition::DeadLetter(DeadLetterReason::RetriesExhausted)
    } else {
        Disposition::Requeue
    }
}

/// Counters for one consumer run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Deliveries pulled
    pub deliveries: u64,
    /// Deliveries acknowledged
    pub acked: u64,
    /// Deliveries requeued
    pub requeued: u64,
    /// Deliveries dropped without a dead-letter record
    pub discarded: u64,
    /// Deliveries dead-lettered
    pub dead_lettered: u64,
    /// Transient broker errors (pull, ack or nack)
    pub transient_errors: u64,
}

impl ConsumerReport {
    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Ack => self.acked += 1,
            Disposition::Requeue => self.requeued += 1,
            Disposition::Discard => self.discarded += 1,
            Disposition::DeadLetter(_) => self.dead_lettered += 1,
        }
    }
}

/// Pulls deliveries from one source and drives them through translation and processing.
///
/// # Example
///
/// ```rust,no_run
/// use warehouse_core::handler::LoggingActionHandler;
/// use warehouse_core::processor::EventProcessor;
/// use warehouse_core::translator::MessageTranslator;
/// use warehouse_runtime::consumer::{ConsumerConfig, ReliableConsumer};
/// # use warehouse_core::broker::DeliverySource;
/// # async fn example(source: impl DeliverySource) {
/// let shutdown = tokio_util::sync::CancellationToken::new();
///
/// let consumer = ReliableConsumer::new(
///     ConsumerConfig::new("kafka"),
///     source,
///     MessageTranslator::strict(),
///     EventProcessor::new(LoggingActionHandler),
/// );
/// let report = consumer.run(shutdown.child_token()).await;
/// println!("acked {}", report.acked);
/// # }
/// ```
pub struct ReliableConsumer<S, H> {
    config: ConsumerConfig,
    source: S,
    translator: MessageTranslator,
    processor: EventProcessor<H>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    clock: Arc<dyn Clock>,
    attempts: HashMap<String, u32>,
    report: ConsumerReport,
    stalled: bool,
}

impl<S, H> ReliableConsumer<S, H>
where
    S: DeliverySource,
    H: WarehouseActionHandler,
{
    /// Creates a consumer without a dead-letter sink.
    #[must_use]
    pub fn new(
        config: ConsumerConfig,
        source: S,
        translator: MessageTranslator,
        processor: EventProcessor<H>,
    ) -> Self {
        Self {
            config,
            source,
            translator,
            processor,
            dead_letters: None,
            clock: Arc::new(SystemClock),
            attempts: HashMap::new(),
            report: ConsumerReport::default(),
            stalled: false,
        }
    }

    /// Routes malformed and exhausted messages to `sink`.
    #[must_use]
    pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Clock used to stamp dead-letter records.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs until `shutdown` is cancelled or the subscription closes, then closes the source.
    pub async fn run(mut self, shutdown: CancellationToken) -> ConsumerReport {
        tracing::info!(
            consumer = %self.config.name,
            policy = %self.translator.policy(),
            pull_timeout_ms = self.config.pull_timeout.as_millis(),
            max_redeliveries = self.config.max_redeliveries,
            "Consumer started"
        );

        let mut consecutive_errors: usize = 0;

        loop {
            let pulled = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::info!(
                        consumer = %self.config.name,
                        "Shutdown requested, stopping consumer"
                    );
                    break;
                }
                pulled = self.source.pull_next(self.config.pull_timeout) => pulled,
            };

            let trouble = match pulled {
                Ok(Some(delivery)) => {
                    if self.handle_delivery(delivery).await {
                        consecutive_errors = 0;
                        continue;
                    }
                    "Broker or dead-letter sink failed while releasing, backing off"
                },
                Ok(None) => {
                    consecutive_errors = 0;
                    tracing::trace!(
                        consumer = %self.config.name,
                        "No delivery within pull timeout"
                    );
                    continue;
                },
                Err(BrokerError::Closed(reason)) => {
                    tracing::info!(consumer = %self.config.name, %reason, "Subscription closed");
                    break;
                },
                Err(err) => {
                    self.note_transient_error();
                    tracing::warn!(
                        consumer = %self.config.name,
                        error = %err,
                        "Failed to pull delivery"
                    );
                    "Failed to pull delivery, backing off"
                },
            };

            let delay = self.config.backoff.delay_for_attempt(consecutive_errors);
            consecutive_errors = consecutive_errors.saturating_add(1);
            tracing::warn!(
                consumer = %self.config.name,
                consecutive_errors,
                delay_ms = delay.as_millis(),
                "{trouble}"
            );

            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        if let Err(err) = self.source.close().await {
            tracing::warn!(
                consumer = %self.config.name,
                error = %err,
                "Failed to close subscription"
            );
        }

        tracing::info!(
            consumer = %self.config.name,
            deliveries = self.report.deliveries,
            acked = self.report.acked,
            requeued = self.report.requeued,
            discarded = self.report.discarded,
            dead_lettered = self.report.dead_lettered,
            transient_errors = self.report.transient_errors,
            "Consumer stopped"
        );
        self.report
    }

    /// Returns `false` when the broker or the dead-letter sink misbehaved.
    async fn handle_delivery(&mut self, delivery: Delivery) -> bool {
        self.stalled = false;
        self.report.deliveries += 1;
        ConsumerMetrics::record_delivery(&self.config.name);

        let disposition = match self.translator.translate(&delivery.payload) {
            Err(err) => {
                tracing::error!(
                    consumer = %self.config.name,
                    key = %delivery.key,
                    error = %err,
                    "Failed to translate message"
                );
                self.reject_malformed(&delivery, &err.to_string()).await
            },
            Ok(translated) => {
                if translated.outcome == TranslationOutcome::FellBack {
                    ConsumerMetrics::record_fallback(&self.config.name);
                }
                match self.processor.process(&translated.event).await {
                    Ok(_) => {
                        self.attempts.remove(&delivery.key);
                        Disposition::Ack
                    },
                    Err(err) => self.on_processing_failure(&delivery, &err.to_string()).await,
                }
            },
        };

        self.release(delivery, disposition).await;
        !self.stalled
    }

    async fn reject_malformed(&mut self, delivery: &Delivery, error: &str) -> Disposition {
        if self.dead_letters.is_none() {
            tracing::warn!(
                consumer = %self.config.name,
                key = %delivery.key,
                payload = %String::from_utf8_lossy(&delivery.payload),
                "Discarding malformed message"
            );
            return Disposition::Discard;
        }

        match self
            .write_dead_letter(delivery, DeadLetterReason::Malformed, error, 0)
            .await
        {
            Ok(()) => Disposition::DeadLetter(DeadLetterReason::Malformed),
            Err(err) => {
                tracing::error!(
                    consumer = %self.config.name,
                    key = %delivery.key,
                    error = %err,
                    payload = %String::from_utf8_lossy(&delivery.payload),
                    "Dead-letter write failed, discarding malformed message"
                );
                self.stalled = true;
                Disposition::Discard
            },
        }
    }

    async fn on_processing_failure(&mut self, delivery: &Delivery, error: &str) -> Disposition {
        let attempts = self.bump_attempts(&delivery.key);
        let max_redeliveries = self.config.max_redeliveries;

        match disposition_for_failure(attempts, max_redeliveries) {
            Disposition::DeadLetter(reason) => {
                if self.dead_letters.is_none() {
                    tracing::error!(
                        consumer = %self.config.name,
                        key = %delivery.key,
                        attempts,
                        error,
                        payload = %String::from_utf8_lossy(&delivery.payload),
                        "Redeliveries exhausted, discarding message"
                    );
                    self.attempts.remove(&delivery.key);
                    return Disposition::Discard;
                }

                match self.write_dead_letter(delivery, reason, error, attempts).await {
                    Ok(()) => {
                        self.attempts.remove(&delivery.key);
                        Disposition::DeadLetter(reason)
                    },
                    Err(err) => {
                        tracing::error!(
                            consumer = %self.config.name,
                            key = %delivery.key,
                            error = %err,
                            "Dead-letter write failed, keeping message on the broker"
                        );
                        self.stalled = true;
                        Disposition::Requeue
                    },
                }
            },
            disposition => {
                tracing::warn!(
                    consumer = %self.config.name,
                    key = %delivery.key,
                    attempts,
                    max_redeliveries,
                    error,
                    "Failed to process message, requeueing"
                );
                disposition
            },
        }
    }

    async fn write_dead_letter(
        &self,
        delivery: &Delivery,
        reason: DeadLetterReason,
        error: &str,
        attempts: u32,
    ) -> Result<(), BrokerError> {
        let Some(sink) = &self.dead_letters else {
            return Ok(());
        };

        let record = DeadLetterRecord {
            consumer: self.config.name.clone(),
            message_key: delivery.key.clone(),
            payload: delivery.payload.clone(),
            reason,
            error: error.to_string(),
            attempts,
            failed_at: self.clock.now(),
        };
        sink.dead_letter(&record).await
    }

    fn bump_attempts(&mut self, key: &str) -> u32 {
        if self.attempts.len() >= MAX_TRACKED_KEYS && !self.attempts.contains_key(key) {
            tracing::warn!(
                consumer = %self.config.name,
                tracked = self.attempts.len(),
                "Attempt ledger full, resetting"
            );
            self.attempts.clear();
        }

        let entry = self.attempts.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
        *entry
    }

    async fn release(&mut self, delivery: Delivery, disposition: Disposition) {
        let result = match disposition {
            Disposition::Ack => self.source.ack(delivery.handle).await,
            Disposition::Requeue => self.source.nack(delivery.handle, true).await,
            Disposition::Discard | Disposition::DeadLetter(_) => {
                self.source.nack(delivery.handle, false).await
            },
        };

        if let Err(err) = result {
            tracing::warn!(
                consumer = %self.config.name,
                key = %delivery.key,
                disposition = disposition.as_str(),
                error = %err,
                "Failed to release delivery, broker will redeliver"
            );
            self.note_transient_error();
            self.stalled = true;
            return;
        }

        self.report.record(disposition);
        ConsumerMetrics::record_disposition(&self.config.name, disposition.as_str());
        tracing::debug!(
            consumer = %self.config.name,
            key = %delivery.key,
            redelivered = delivery.redelivered,
            disposition = disposition.as_str(),
            "Delivery released"
        );
    }

    fn note_transient_error(&mut self) {
        self.report.transient_errors += 1;
        ConsumerMetrics::record_transient_error(&self.config.name);
    }
}
