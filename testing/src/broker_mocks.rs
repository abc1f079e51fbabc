//! In-memory broker for consumer tests.
//!
//! [`InMemoryBroker`] is the test-side handle: enqueue messages, script broker
//! errors and inspect how each delivery was released. [`InMemoryDeliverySource`]
//! is the consumer-side subscription, created with [`InMemoryBroker::subscribe`].
//!
//! Requeued deliveries go back to the front of the queue with `redelivered` set and
//! keep their message id, the way a Kafka seek or an AMQP requeue behaves.

#![allow(clippy::missing_panics_doc)] // Poisoned locks only happen after a test already panicked

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use warehouse_core::OrderEvent;
use warehouse_core::broker::{
    BrokerError, DeadLetterRecord, DeadLetterSink, Delivery, DeliveryHandle, DeliverySource,
    EventPublisher,
};
use warehouse_core::translator;

/// How the consumer released one delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Release {
    /// Acknowledged (message id)
    Acked(String),
    /// Nacked with requeue (message id)
    Requeued(String),
    /// Nacked without requeue (message id)
    Discarded(String),
}

/// A message as it was published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Broker-assigned message id, used as [`Delivery::key`]
    pub id: String,
    /// Publisher-supplied routing key
    pub key: String,
    /// Raw payload
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug)]
struct Queued {
    message: PublishedMessage,
    redelivered: bool,
}

#[derive(Debug)]
enum Scripted {
    Message(Queued),
    Error(BrokerError),
}

#[derive(Debug, Default)]
struct BrokerState {
    queue: VecDeque<Scripted>,
    in_flight: HashMap<u64, Queued>,
    published: Vec<PublishedMessage>,
    releases: Vec<Release>,
    next_sequence: u64,
    next_message: u64,
    close_when_drained: bool,
    closed: bool,
    failing_releases: usize,
}

/// Shared in-memory broker.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscription over this broker's queue.
    #[must_use]
    pub fn subscribe(&self) -> InMemoryDeliverySource {
        InMemoryDeliverySource {
            broker: self.clone(),
        }
    }

    /// Enqueue a raw payload under `key`. Returns the message id.
    pub fn enqueue(&self, key: &str, payload: impl Into<Vec<u8>>) -> String {
        let id = {
            let mut state = self.lock();
            state.next_message += 1;
            let message = PublishedMessage {
                id: format!("msg-{}", state.next_message),
                key: key.to_string(),
                payload: payload.into(),
            };
            let id = message.id.clone();
            state.published.push(message.clone());
            state.queue.push_back(Scripted::Message(Queued {
                message,
                redelivered: false,
            }));
            id
        };
        self.notify.notify_one();
        id
    }

    /// Enqueue an event in its JSON wire shape, keyed by order id.
    ///
    /// # Panics
    ///
    /// Panics if the event cannot be serialized.
    #[allow(clippy::expect_used)]
    pub fn enqueue_event(&self, event: &OrderEvent) -> String {
        let payload = translator::encode(event).expect("order events always serialize");
        self.enqueue(&event.order_id, payload)
    }

    /// Make the next pull fail with `error`.
    pub fn inject_error(&self, error: BrokerError) {
        self.lock().queue.push_back(Scripted::Error(error));
        self.notify.notify_one();
    }

    /// Report the subscription as closed once the queue is empty and nothing is in flight.
    pub fn close_when_drained(&self) {
        self.lock().close_when_drained = true;
        self.notify.notify_one();
    }

    /// Make the next `count` ack/nack calls fail with a transient error.
    pub fn fail_next_releases(&self, count: usize) {
        self.lock().failing_releases = count;
    }

    /// Every message published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Releases in the order the consumer made them.
    #[must_use]
    pub fn releases(&self) -> Vec<Release> {
        self.lock().releases.clone()
    }

    /// Ids of acknowledged messages.
    #[must_use]
    pub fn acked(&self) -> Vec<String> {
        self.releases()
            .into_iter()
            .filter_map(|release| match release {
                Release::Acked(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Messages and scripted errors still waiting to be pulled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Deliveries pulled but not yet released.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Whether a subscription called `close()`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn try_pull(&self) -> Option<Result<Option<Delivery>, BrokerError>> {
        let mut state = self.lock();
        if state.closed {
            return Some(Err(BrokerError::Closed("subscription closed".to_string())));
        }

        match state.queue.pop_front() {
            Some(Scripted::Message(queued)) => {
                state.next_sequence += 1;
                let sequence = state.next_sequence;
                let delivery = Delivery {
                    payload: queued.message.payload.clone(),
                    handle: DeliveryHandle::new(sequence),
                    key: queued.message.id.clone(),
                    redelivered: queued.redelivered,
                };
                state.in_flight.insert(sequence, queued);
                Some(Ok(Some(delivery)))
            },
            Some(Scripted::Error(err)) => Some(Err(err)),
            None if state.close_when_drained && state.in_flight.is_empty() => {
                Some(Err(BrokerError::Closed("queue drained".to_string())))
            },
            None => None,
        }
    }

    fn release(&self, handle: DeliveryHandle, requeue: Option<bool>) -> Result<(), BrokerError> {
        let mut state = self.lock();
        let queued = state
            .in_flight
            .remove(&handle.sequence())
            .ok_or(BrokerError::UnknownDelivery(handle))?;

        // A lost release leaves the message unacknowledged; the broker redelivers it.
        if state.failing_releases > 0 {
            state.failing_releases -= 1;
            state.queue.push_front(Scripted::Message(Queued {
                message: queued.message,
                redelivered: true,
            }));
            drop(state);
            self.notify.notify_one();
            return Err(BrokerError::Transient("scripted release failure".to_string()));
        }

        let id = queued.message.id.clone();

        match requeue {
            None => state.releases.push(Release::Acked(id)),
            Some(true) => {
                state.releases.push(Release::Requeued(id));
                state.queue.push_front(Scripted::Message(Queued {
                    message: queued.message,
                    redelivered: true,
                }));
            },
            Some(false) => state.releases.push(Release::Discarded(id)),
        }
        drop(state);
        self.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, event: &OrderEvent) -> Result<(), BrokerError> {
        let payload = translator::encode(event).map_err(|e| BrokerError::PublishFailed {
            destination: "in-memory".to_string(),
            reason: e.to_string(),
        })?;
        self.enqueue(&event.order_id, payload);
        Ok(())
    }

    async fn publish_raw(&self, key: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.enqueue(key, payload.to_vec());
        Ok(())
    }
}

/// Consumer-side view of an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryDeliverySource {
    broker: InMemoryBroker,
}

#[async_trait]
impl DeliverySource for InMemoryDeliverySource {
    async fn pull_next(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(pulled) = self.broker.try_pull() {
                return pulled;
            }
            if tokio::time::timeout_at(deadline, self.broker.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&mut self, handle: DeliveryHandle) -> Result<(), BrokerError> {
        self.broker.release(handle, None)
    }

    async fn nack(&mut self, handle: DeliveryHandle, requeue: bool) -> Result<(), BrokerError> {
        self.broker.release(handle, Some(requeue))
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.broker.lock().closed = true;
        Ok(())
    }
}

/// Dead-letter sink that keeps records in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDeadLetterSink {
    records: Arc<Mutex<Vec<DeadLetterRecord>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryDeadLetterSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Records written so far.
    #[must_use]
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn dead_letter(&self, record: &DeadLetterRecord) -> Result<(), BrokerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BrokerError::PublishFailed {
                destination: "in-memory-dlq".to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}
