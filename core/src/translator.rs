//! Translation between broker payloads and [`OrderEvent`]s.
//!
//! Each channel picks a [`TranslationPolicy`]:
//!
//! - [`TranslationPolicy::Strict`] for channels that are contractually JSON-only.
//!   A payload that does not decode is a [`TranslationError`] and the caller must
//!   treat the delivery as malformed.
//! - [`TranslationPolicy::Lenient`] for mixed-content legacy channels. A payload
//!   that does not decode becomes an `order.message` event with order id
//!   `unknown`, stamped with the translation time, so the delivery is never lost.
//!
//! Decoded field values are trusted verbatim; no range or format validation
//! happens here.

use crate::environment::Clock;
use crate::order::OrderEvent;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while converting between payloads and events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    /// Payload is not a valid order event
    #[error("Malformed order event payload: {reason}")]
    Malformed {
        /// Decoder diagnostic
        reason: String,
    },

    /// Event could not be encoded
    #[error("Failed to encode order event: {0}")]
    Encode(String),
}

/// How a channel treats payloads that do not decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranslationPolicy {
    /// Reject undecodable payloads
    Strict,
    /// Replace undecodable payloads with a fallback event
    Lenient,
}

impl fmt::Display for TranslationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => f.write_str("strict"),
            Self::Lenient => f.write_str("lenient"),
        }
    }
}

/// Which path produced a translated event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranslationOutcome {
    /// Structured decode succeeded
    Decoded,
    /// Lenient fallback event was synthesized
    FellBack,
}

/// A successfully translated delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Translated {
    /// The event to process
    pub event: OrderEvent,
    /// Path that produced it
    pub outcome: TranslationOutcome,
}

/// Converts raw payloads into [`OrderEvent`]s under a fixed policy.
#[derive(Clone)]
pub struct MessageTranslator {
    policy: TranslationPolicy,
    clock: Arc<dyn Clock>,
}

impl MessageTranslator {
    /// Creates a translator with the given policy and clock (used to stamp fallback events).
    #[must_use]
    pub fn new(policy: TranslationPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    /// Strict translator using the system clock.
    #[must_use]
    pub fn strict() -> Self {
        Self::new(TranslationPolicy::Strict, Arc::new(crate::environment::SystemClock))
    }

    /// Lenient translator using the system clock.
    #[must_use]
    pub fn lenient() -> Self {
        Self::new(TranslationPolicy::Lenient, Arc::new(crate::environment::SystemClock))
    }

    /// Policy in effect for this translator's channel.
    #[must_use]
    pub const fn policy(&self) -> TranslationPolicy {
        self.policy
    }

    /// Translates a raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`TranslationError::Malformed`] when the payload does not decode and the
    /// policy is [`TranslationPolicy::Strict`]. A lenient translator never fails.
    pub fn translate(&self, payload: &[u8]) -> Result<Translated, TranslationError> {
        match serde_json::from_slice::<OrderEvent>(payload) {
            Ok(event) => {
                tracing::debug!(
                    event_type = %event.event_type,
                    order_id = %event.order_id,
                    "Parsed order event"
                );
                Ok(Translated {
                    event,
                    outcome: TranslationOutcome::Decoded,
                })
            },
            Err(e) => match self.policy {
                TranslationPolicy::Strict => {
                    tracing::warn!(
                        error = %e,
                        payload = %String::from_utf8_lossy(payload),
                        "Failed to decode order event"
                    );
                    Err(TranslationError::Malformed {
                        reason: e.to_string(),
                    })
                },
                TranslationPolicy::Lenient => {
                    tracing::info!(
                        payload = %String::from_utf8_lossy(payload),
                        "Received non-JSON message, created fallback event"
                    );
                    Ok(Translated {
                        event: OrderEvent::fallback(self.clock.now()),
                        outcome: TranslationOutcome::FellBack,
                    })
                },
            },
        }
    }
}

impl fmt::Debug for MessageTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageTranslator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Encodes an event in the wire shape accepted by [`MessageTranslator::translate`].
///
/// # Errors
///
/// Returns [`TranslationError::Encode`] if serialization fails.
pub fn encode(event: &OrderEvent) -> Result<Vec<u8>, TranslationError> {
    serde_json::to_vec(event).map_err(|e| TranslationError::Encode(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::environment::Clock;
    use chrono::{DateTime, TimeZone, Utc};

    struct StaticClock(DateTime<Utc>);

    impl Clock for StaticClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn strict_rejects_plain_text() {
        let translator =
            MessageTranslator::new(TranslationPolicy::Strict, Arc::new(StaticClock(at(0))));
        let err = translator.translate(b"Hello Kafka").unwrap_err();
        assert!(matches!(err, TranslationError::Malformed { .. }));
    }

    #[test]
    fn strict_rejects_empty_payload() {
        let translator =
            MessageTranslator::new(TranslationPolicy::Strict, Arc::new(StaticClock(at(0))));
        assert!(translator.translate(b"").is_err());
    }

    #[test]
    fn lenient_falls_back_on_empty_payload() {
        let translator = MessageTranslator::new(
            TranslationPolicy::Lenient,
            Arc::new(StaticClock(at(1_700_000_000))),
        );
        let translated = translator.translate(b"").unwrap();

        assert_eq!(translated.outcome, TranslationOutcome::FellBack);
        assert_eq!(translated.event.event_type, "order.message");
        assert_eq!(translated.event.timestamp, at(1_700_000_000));
    }

    #[test]
    fn out_of_range_quantity_is_decoded_verbatim() {
        let translator = MessageTranslator::strict();
        let payload = br#"{"event_type":"order.created","order_id":"ord-1","order":{"id":"ord-1","quantity":-1}}"#;
        let translated = translator.translate(payload).unwrap();
        assert_eq!(translated.event.order.unwrap().quantity, -1);

        let payload = br#"{"event_type":"order.created","order":{"quantity":5000000000}}"#;
        let translated = translator.translate(payload).unwrap();
        assert_eq!(translated.event.order.unwrap().quantity, 5_000_000_000);
    }

    #[test]
    fn lenient_falls_back_with_translation_time() {
        let translator = MessageTranslator::new(
            TranslationPolicy::Lenient,
            Arc::new(StaticClock(at(1_700_000_000))),
        );
        let translated = translator.translate(b"not json at all").unwrap();

        assert_eq!(translated.outcome, TranslationOutcome::FellBack);
        assert_eq!(translated.event.event_type, "order.message");
        assert_eq!(translated.event.order_id, "unknown");
        assert!(translated.event.order.is_none());
        assert_eq!(translated.event.timestamp, at(1_700_000_000));
    }

    #[test]
    fn lenient_decodes_structured_payload_verbatim() {
        let translator =
            MessageTranslator::new(TranslationPolicy::Lenient, Arc::new(StaticClock(at(0))));
        let payload = br#"{"event_type":"order.shipped","order_id":"ord-9","order":{"id":"ord-9","quantity":2}}"#;
        let translated = translator.translate(payload).unwrap();

        assert_eq!(translated.outcome, TranslationOutcome::Decoded);
        assert_eq!(translated.event.event_type, "order.shipped");
        assert_eq!(translated.event.order_id, "ord-9");
    }

    #[test]
    fn mismatched_order_id_is_trusted() {
        let translator = MessageTranslator::strict();
        let payload = br#"{"event_type":"order.created","order_id":"a","order":{"id":"b"}}"#;
        let translated = translator.translate(payload).unwrap();
        assert_eq!(translated.event.order_id, "a");
        assert_eq!(translated.event.order.unwrap().id, "b");
    }
}
