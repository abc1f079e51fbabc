//! Event processing: relevance gate, routing and handler dispatch.
//!
//! ```text
//! OrderEvent ──► relevant? ──no──► Skipped (Ok)
//!                   │
//!                  yes
//!                   ▼
//!            warehouse_action()
//!                   │
//!        ┌──────────┼──────────────┐
//!        ▼          ▼              ▼
//!    known action   …          Unknown ──► ProcessError::Unroutable
//!        │
//!        ▼
//!  WarehouseActionHandler
//! ```
//!
//! Irrelevant events are skipped, not failed. A relevant event whose action is
//! `unknown` is a routing failure and surfaces as an error so the consumer can
//! requeue it.

use crate::handler::{HandlerError, WarehouseActionHandler};
use crate::order::OrderEvent;
use crate::routing::{DamageDisposition, WarehouseAction};
use thiserror::Error;

/// Processing failures. Both variants are retryable from the consumer's point of view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// Event passed the relevance gate but no action is routed for it
    #[error("Unknown warehouse action for event type '{event_type}'")]
    Unroutable {
        /// The unroutable event type
        event_type: String,
    },

    /// The action handler failed
    #[error("Warehouse action '{action}' failed: {source}")]
    Handler {
        /// Action that failed
        action: WarehouseAction,
        /// Handler failure
        #[source]
        source: HandlerError,
    },
}

/// What the processor did with an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Event is not warehouse-relevant
    Skipped,
    /// Event was dispatched to the handler for this action
    Dispatched(WarehouseAction),
}

/// Routes order events to a [`WarehouseActionHandler`].
#[derive(Clone, Debug)]
pub struct EventProcessor<H> {
    handler: H,
}

impl<H: WarehouseActionHandler> EventProcessor<H> {
    /// Creates a processor dispatching to `handler`.
    #[must_use]
    pub const fn new(handler: H) -> Self {
        Self { handler }
    }

    /// The injected handler.
    #[must_use]
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    /// Processes one event.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Unroutable`] for a relevant event without a route and
    /// [`ProcessError::Handler`] when the action handler fails.
    pub async fn process(&self, event: &OrderEvent) -> Result<ProcessOutcome, ProcessError> {
        tracing::info!(
            event_type = %event.event_type,
            order_id = %event.order_id,
            status = event.order_status(),
            "Received order event"
        );

        if !event.is_warehouse_relevant() {
            tracing::info!(
                event_type = %event.event_type,
                "Event type is not relevant for warehouse processing, skipping"
            );
            metrics::counter!("warehouse_events_skipped_total").increment(1);
            return Ok(ProcessOutcome::Skipped);
        }

        let action = event.warehouse_action();
        tracing::info!(
            action = %action,
            order_id = %event.order_id,
            "Processing warehouse action"
        );

        self.dispatch(action, event).await?;

        metrics::counter!("warehouse_actions_dispatched_total", "action" => action.as_str())
            .increment(1);
        Ok(ProcessOutcome::Dispatched(action))
    }

    /// Runs the handler for `action`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Unroutable`] for [`WarehouseAction::Unknown`] and
    /// [`ProcessError::Handler`] when the handler fails.
    pub async fn dispatch(
        &self,
        action: WarehouseAction,
        event: &OrderEvent,
    ) -> Result<(), ProcessError> {
        let result = match action {
            WarehouseAction::ProcessDamage => {
                let Some(disposition) = DamageDisposition::from_status(event.order_status()) else {
                    tracing::warn!(
                        status = event.order_status(),
                        order_id = %event.order_id,
                        "Unknown damage status, nothing to do"
                    );
                    return Ok(());
                };
                self.handler.process_damage(event, disposition).await
            },
            WarehouseAction::AllocateInventory => self.handler.allocate_inventory(event).await,
            WarehouseAction::ReleaseInventory => self.handler.release_inventory(event).await,
            WarehouseAction::UpdateInventory => self.handler.update_inventory(event).await,
            WarehouseAction::ConfirmDelivery => self.handler.confirm_delivery(event).await,
            WarehouseAction::ProcessReturn => self.handler.process_return(event).await,
            WarehouseAction::ConfirmAllocation => self.handler.confirm_allocation(event).await,
            WarehouseAction::ConfirmRelease => self.handler.confirm_release(event).await,
            WarehouseAction::Unknown => {
                tracing::error!(event_type = %event.event_type, "Unknown warehouse action");
                return Err(ProcessError::Unroutable {
                    event_type: event.event_type.clone(),
                });
            },
        };

        result.map_err(|source| ProcessError::Handler { action, source })
    }
}
