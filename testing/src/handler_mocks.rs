//! Recording warehouse action handler.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use warehouse_core::OrderEvent;
use warehouse_core::handler::{HandlerError, WarehouseActionHandler};
use warehouse_core::routing::{DamageDisposition, WarehouseAction};

/// One handler invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    /// Action that was invoked
    pub action: WarehouseAction,
    /// Order id of the event
    pub order_id: String,
    /// Damage sub-state, for `process_damage` only
    pub disposition: Option<DamageDisposition>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum FailurePlan {
    #[default]
    Never,
    Next(usize),
    Always,
}

#[derive(Debug, Default)]
struct Recorder {
    calls: Vec<RecordedCall>,
    plan: FailurePlan,
}

/// Handler that records every call and fails on demand.
///
/// Clones share state, so keep one clone for assertions after moving another into
/// an [`EventProcessor`](warehouse_core::processor::EventProcessor).
///
/// ```
/// use warehouse_testing::RecordingActionHandler;
///
/// let handler = RecordingActionHandler::new();
/// handler.fail_next(2);
/// assert!(handler.calls().is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct RecordingActionHandler {
    inner: Arc<Mutex<Recorder>>,
}

impl RecordingActionHandler {
    /// Handler that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorder> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `count` calls with [`HandlerError::Unavailable`].
    pub fn fail_next(&self, count: usize) {
        self.lock().plan = FailurePlan::Next(count);
    }

    /// Fail every call from now on.
    pub fn fail_always(&self) {
        self.lock().plan = FailurePlan::Always;
    }

    /// Calls recorded so far, including failed ones.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Actions recorded so far.
    #[must_use]
    pub fn actions(&self) -> Vec<WarehouseAction> {
        self.lock().calls.iter().map(|call| call.action).collect()
    }

    fn record(
        &self,
        action: WarehouseAction,
        event: &OrderEvent,
        disposition: Option<DamageDisposition>,
    ) -> Result<(), HandlerError> {
        let mut recorder = self.lock();
        recorder.calls.push(RecordedCall {
            action,
            order_id: event.order_id.clone(),
            disposition,
        });

        let fail = match recorder.plan {
            FailurePlan::Never => false,
            FailurePlan::Always => true,
            FailurePlan::Next(0) => {
                recorder.plan = FailurePlan::Never;
                false
            },
            FailurePlan::Next(remaining) => {
                recorder.plan = FailurePlan::Next(remaining - 1);
                true
            },
        };

        if fail {
            Err(HandlerError::Unavailable(format!("scripted failure for {action}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WarehouseActionHandler for RecordingActionHandler {
    async fn process_damage(
        &self,
        event: &OrderEvent,
        disposition: DamageDisposition,
    ) -> Result<(), HandlerError> {
        self.record(WarehouseAction::ProcessDamage, event, Some(disposition))
    }

    async fn allocate_inventory(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        self.record(WarehouseAction::AllocateInventory, event, None)
    }

    async fn release_inventory(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        self.record(WarehouseAction::ReleaseInventory, event, None)
    }

    async fn update_inventory(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        self.record(WarehouseAction::UpdateInventory, event, None)
    }

    async fn confirm_delivery(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        self.record(WarehouseAction::ConfirmDelivery, event, None)
    }

    async fn process_return(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        self.record(WarehouseAction::ProcessReturn, event, None)
    }

    async fn confirm_allocation(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        self.record(WarehouseAction::ConfirmAllocation, event, None)
    }

    async fn confirm_release(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        self.record(WarehouseAction::ConfirmRelease, event, None)
    }
}
