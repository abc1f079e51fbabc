//! Order snapshot and the order event consumed by the warehouse pipeline.
//!
//! Both types are plain values. The pipeline never mutates or persists an
//! [`Order`]; it only reads the snapshot embedded in an [`OrderEvent`].
//!
//! # Wire shape
//!
//! ```json
//! {
//!   "event_type": "order.created",
//!   "order_id": "ord-42",
//!   "order": {
//!     "id": "ord-42",
//!     "customer_id": "cust-1",
//!     "product_id": "prod-7",
//!     "quantity": 3,
//!     "status": "created",
//!     "total_amount": 29.97,
//!     "created_at": "2025-01-01T10:00:00Z",
//!     "updated_at": "2025-01-01T10:00:00Z"
//!   },
//!   "timestamp": "2025-01-01T10:00:01Z"
//! }
//! ```
//!
//! Producers emit zero values for fields they leave unset, so every field except
//! `event_type` decodes to its default when absent.

use crate::routing::{WarehouseAction, WarehouseEventType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Event type synthesized when a lenient channel receives an unstructured payload.
pub const FALLBACK_EVENT_TYPE: &str = "order.message";

/// Order id used by synthesized fallback events.
pub const UNKNOWN_ORDER_ID: &str = "unknown";

/// Snapshot of an order at event time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    /// Unique order identifier
    pub id: String,
    /// Customer that placed the order
    pub customer_id: String,
    /// Ordered product
    pub product_id: String,
    /// Number of units, taken as sent
    pub quantity: i64,
    /// Lifecycle status (open vocabulary, e.g. `created`, `damage_detected_minor`)
    pub status: String,
    /// Order total
    pub total_amount: Decimal,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time, never earlier than `created_at`
    pub updated_at: DateTime<Utc>,
}

/// The unit the pipeline consumes.
///
/// `event_type` is the only mandatory field on the wire. `order` is `None` when the
/// event was synthesized by a lenient translator or the producer omitted it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Dot-namespaced event type, e.g. `order.created`
    pub event_type: String,
    /// Id of the order this event is about; `"unknown"` for fallback events
    #[serde(default)]
    pub order_id: String,
    /// Order snapshot at emission time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    /// Emission time (not broker receipt time)
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
}

impl OrderEvent {
    /// Creates an event for `order`, taking the order id from the snapshot.
    #[must_use]
    pub fn new(event_type: impl Into<String>, order: Order, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.into(),
            order_id: order.id.clone(),
            order: Some(order),
            timestamp,
        }
    }

    /// Creates the placeholder event used when a payload has no recoverable structure.
    #[must_use]
    pub fn fallback(at: DateTime<Utc>) -> Self {
        Self {
            event_type: FALLBACK_EVENT_TYPE.to_string(),
            order_id: UNKNOWN_ORDER_ID.to_string(),
            order: None,
            timestamp: at,
        }
    }

    /// Returns the classified event type, or `None` when the warehouse does not handle it.
    #[must_use]
    pub fn warehouse_event_type(&self) -> Option<WarehouseEventType> {
        WarehouseEventType::parse(&self.event_type)
    }

    /// Returns `true` iff `event_type` exactly matches one of the warehouse-relevant types.
    #[must_use]
    pub fn is_warehouse_relevant(&self) -> bool {
        self.warehouse_event_type().is_some()
    }

    /// Maps `event_type` to the warehouse action, [`WarehouseAction::Unknown`] otherwise.
    #[must_use]
    pub fn warehouse_action(&self) -> WarehouseAction {
        WarehouseAction::for_event_type(&self.event_type)
    }

    /// Status of the embedded order, empty when the snapshot is absent.
    #[must_use]
    pub fn order_status(&self) -> &str {
        self.order.as_ref().map_or("", |order| order.status.as_str())
    }
}
