//! Action routing: which order events the warehouse handles and what it does with them.
//!
//! Classification is a closed enum switch. [`WarehouseEventType`] is the relevance
//! set; every variant maps to exactly one [`WarehouseAction`] through an exhaustive
//! `match`, so the relevance gate and the action table cannot drift apart. Any
//! other `event_type` string is irrelevant and routes to [`WarehouseAction::Unknown`].
//!
//! | `event_type`                | action               |
//! |-----------------------------|----------------------|
//! | `order.damage_processed`    | `process_damage`     |
//! | `order.created`             | `allocate_inventory` |
//! | `order.cancelled`           | `release_inventory`  |
//! | `order.shipped`             | `update_inventory`   |
//! | `order.delivered`           | `confirm_delivery`   |
//! | `order.returned`            | `process_return`     |
//! | `order.inventory_allocated` | `confirm_allocation` |
//! | `order.inventory_released`  | `confirm_release`    |
//! | anything else               | `unknown`            |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order event types the warehouse reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WarehouseEventType {
    /// `order.created`
    Created,
    /// `order.cancelled`
    Cancelled,
    /// `order.shipped`
    Shipped,
    /// `order.delivered`
    Delivered,
    /// `order.returned`
    Returned,
    /// `order.inventory_allocated`
    InventoryAllocated,
    /// `order.inventory_released`
    InventoryReleased,
    /// `order.damage_processed`
    DamageProcessed,
}

impl WarehouseEventType {
    /// Every warehouse-relevant event type.
    pub const ALL: [Self; 8] = [
        Self::Created,
        Self::Cancelled,
        Self::Shipped,
        Self::Delivered,
        Self::Returned,
        Self::InventoryAllocated,
        Self::InventoryReleased,
        Self::DamageProcessed,
    ];

    /// Exact, case-sensitive match against the wire names. No prefix or wildcard matching.
    #[must_use]
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "order.created" => Some(Self::Created),
            "order.cancelled" => Some(Self::Cancelled),
            "order.shipped" => Some(Self::Shipped),
            "order.delivered" => Some(Self::Delivered),
            "order.returned" => Some(Self::Returned),
            "order.inventory_allocated" => Some(Self::InventoryAllocated),
            "order.inventory_released" => Some(Self::InventoryReleased),
            "order.damage_processed" => Some(Self::DamageProcessed),
            _ => None,
        }
    }

    /// Wire name of this event type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "order.created",
            Self::Cancelled => "order.cancelled",
            Self::Shipped => "order.shipped",
            Self::Delivered => "order.delivered",
            Self::Returned => "order.returned",
            Self::InventoryAllocated => "order.inventory_allocated",
            Self::InventoryReleased => "order.inventory_released",
            Self::DamageProcessed => "order.damage_processed",
        }
    }

    /// The action this event type routes to. Never [`WarehouseAction::Unknown`].
    #[must_use]
    pub const fn action(&self) -> WarehouseAction {
        match self {
            Self::DamageProcessed => WarehouseAction::ProcessDamage,
            Self::Created => WarehouseAction::AllocateInventory,
            Self::Cancelled => WarehouseAction::ReleaseInventory,
            Self::Shipped => WarehouseAction::UpdateInventory,
            Self::Delivered => WarehouseAction::ConfirmDelivery,
            Self::Returned => WarehouseAction::ProcessReturn,
            Self::InventoryAllocated => WarehouseAction::ConfirmAllocation,
            Self::InventoryReleased => WarehouseAction::ConfirmRelease,
        }
    }
}

impl fmt::Display for WarehouseEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation the warehouse performs in response to a relevant order event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseAction {
    /// Inspect, mark or finalize damaged stock
    ProcessDamage,
    /// Reserve stock for a new order
    AllocateInventory,
    /// Return reserved stock after a cancellation
    ReleaseInventory,
    /// Deduct shipped stock
    UpdateInventory,
    /// Close out a delivered order
    ConfirmDelivery,
    /// Take returned items back into stock
    ProcessReturn,
    /// Confirm a completed allocation
    ConfirmAllocation,
    /// Confirm a completed release
    ConfirmRelease,
    /// No route exists for the event type
    Unknown,
}

impl WarehouseAction {
    /// Total mapping from a raw `event_type` string to an action.
    #[must_use]
    pub fn for_event_type(event_type: &str) -> Self {
        WarehouseEventType::parse(event_type).map_or(Self::Unknown, |kind| kind.action())
    }

    /// Token used in logs, metrics labels and serialized form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessDamage => "process_damage",
            Self::AllocateInventory => "allocate_inventory",
            Self::ReleaseInventory => "release_inventory",
            Self::UpdateInventory => "update_inventory",
            Self::ConfirmDelivery => "confirm_delivery",
            Self::ProcessReturn => "process_return",
            Self::ConfirmAllocation => "confirm_allocation",
            Self::ConfirmRelease => "confirm_release",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for WarehouseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-state of `process_damage`, read from the order status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DamageDisposition {
    /// `damage_detected_minor`: hold the items for inspection
    MarkForInspection,
    /// `damage_detected_major`: write the items off as damaged
    MarkDamaged,
    /// `damage_processed`: damage handling is complete
    Finalize,
}

impl DamageDisposition {
    /// Parses an order status. Statuses outside the damage vocabulary yield `None`.
    #[must_use]
    pub fn from_status(status: &str) -> Option<Self> {
        match status {
            "damage_detected_minor" => Some(Self::MarkForInspection),
            "damage_detected_major" => Some(Self::MarkDamaged),
            "damage_processed" => Some(Self::Finalize),
            _ => None,
        }
    }
}
