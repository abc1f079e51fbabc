//! Warehouse action handler port.
//!
//! The [`EventProcessor`](crate::processor::EventProcessor) decides *which* action
//! to run; a [`WarehouseActionHandler`] decides *what* running it means. A real
//! warehouse-system integration implements this trait and is injected into the
//! processor without touching routing.
//!
//! [`LoggingActionHandler`] is the stock implementation: every action is a
//! side-effect-free stub that records a structured log line.

use crate::order::OrderEvent;
use crate::routing::{DamageDisposition, WarehouseAction};
use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a warehouse action handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The downstream warehouse system is unavailable; retrying may succeed
    #[error("Warehouse system unavailable: {0}")]
    Unavailable(String),

    /// The action was rejected by business rules
    #[error("Action rejected: {0}")]
    Rejected(String),
}

/// One method per warehouse action.
///
/// Handlers must be idempotent: deliveries are at-least-once, so the same event can
/// reach a handler more than once.
#[async_trait]
pub trait WarehouseActionHandler: Send + Sync {
    /// `process_damage`, already narrowed to a recognized damage sub-state.
    async fn process_damage(
        &self,
        event: &OrderEvent,
        disposition: DamageDisposition,
    ) -> Result<(), HandlerError>;

    /// `allocate_inventory`
    async fn allocate_inventory(&self, event: &OrderEvent) -> Result<(), HandlerError>;

    /// `release_inventory`
    async fn release_inventory(&self, event: &OrderEvent) -> Result<(), HandlerError>;

    /// `update_inventory`
    async fn update_inventory(&self, event: &OrderEvent) -> Result<(), HandlerError>;

    /// `confirm_delivery`
    async fn confirm_delivery(&self, event: &OrderEvent) -> Result<(), HandlerError>;

    /// `process_return`
    async fn process_return(&self, event: &OrderEvent) -> Result<(), HandlerError>;

    /// `confirm_allocation`
    async fn confirm_allocation(&self, event: &OrderEvent) -> Result<(), HandlerError>;

    /// `confirm_release`
    async fn confirm_release(&self, event: &OrderEvent) -> Result<(), HandlerError>;
}

/// Stub handler that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingActionHandler;

impl LoggingActionHandler {
    fn log(action: WarehouseAction, event: &OrderEvent, message: &'static str) {
        let (product_id, quantity) = event
            .order
            .as_ref()
            .map_or(("", 0), |order| (order.product_id.as_str(), order.quantity));

        tracing::info!(
            action = %action,
            order_id = %event.order_id,
            product_id,
            quantity,
            "{message}"
        );
    }
}

#[async_trait]
impl WarehouseActionHandler for LoggingActionHandler {
    async fn process_damage(
        &self,
        event: &OrderEvent,
        disposition: DamageDisposition,
    ) -> Result<(), HandlerError> {
        let message = match disposition {
            DamageDisposition::MarkForInspection => "Minor damage detected, marking for inspection",
            DamageDisposition::MarkDamaged => "Major damage detected, marking as damaged",
            DamageDisposition::Finalize => "Damage processing completed",
        };
        Self::log(WarehouseAction::ProcessDamage, event, message);
        Ok(())
    }

    async fn allocate_inventory(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        Self::log(WarehouseAction::AllocateInventory, event, "Allocating inventory");
        Ok(())
    }

    async fn release_inventory(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        Self::log(
            WarehouseAction::ReleaseInventory,
            event,
            "Releasing inventory for cancelled order",
        );
        Ok(())
    }

    async fn update_inventory(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        Self::log(
            WarehouseAction::UpdateInventory,
            event,
            "Updating inventory for shipped order",
        );
        Ok(())
    }

    async fn confirm_delivery(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        Self::log(WarehouseAction::ConfirmDelivery, event, "Confirming delivery");
        Ok(())
    }

    async fn process_return(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        Self::log(WarehouseAction::ProcessReturn, event, "Processing return");
        Ok(())
    }

    async fn confirm_allocation(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        Self::log(
            WarehouseAction::ConfirmAllocation,
            event,
            "Confirming inventory allocation",
        );
        Ok(())
    }

    async fn confirm_release(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        Self::log(
            WarehouseAction::ConfirmRelease,
            event,
            "Confirming inventory release",
        );
        Ok(())
    }
}
