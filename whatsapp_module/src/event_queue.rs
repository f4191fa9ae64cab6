//! Queue abstraction between the ingress gateway and the worker.
//!
//! The queue is at-least-once: a received event stays locked for the
//! visibility window and is redelivered unless acknowledged. Bodies are the
//! verbatim webhook JSON, untouched by the gateway.

use std::collections::{HashMap, VecDeque};
use std::env;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use uuid::Uuid;

use crate::service_bus_queue::ServiceBusEventQueue;

#[derive(Debug, Error)]
pub enum EventQueueError {
    #[error("service bus error: {0}")]
    ServiceBus(String),
    #[error("event queue config error: {0}")]
    Config(String),
    #[error("no pending lock for receipt {0}")]
    MissingLock(Uuid),
    #[error("queue lock poisoned")]
    LockPoisoned,
}

/// A received-but-unacknowledged event. `id` is the local receipt handle
/// used to settle the message.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub id: Uuid,
    pub body: String,
}

pub trait EventQueue: Send + Sync {
    fn enqueue(&self, body: &str) -> Result<(), EventQueueError>;
    /// Bounded-wait receive. `None` means the queue was empty for the whole
    /// wait window.
    fn receive(&self) -> Result<Option<QueuedEvent>, EventQueueError>;
    /// Delete the event; it will never be delivered again.
    fn ack(&self, id: &Uuid) -> Result<(), EventQueueError>;
    /// Release the lock so the transport redelivers the event.
    fn nack(&self, id: &Uuid) -> Result<(), EventQueueError>;
}

/// Select the queue backend from `EVENT_QUEUE_BACKEND`.
pub fn resolve_event_queue_backend() -> String {
    env::var("EVENT_QUEUE_BACKEND")
        .ok()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "servicebus".to_string())
}

pub fn build_queue_from_env() -> Result<Arc<dyn EventQueue>, EventQueueError> {
    match resolve_event_queue_backend().as_str() {
        "memory" => Ok(Arc::new(MemoryEventQueue::new())),
        "servicebus" => Ok(Arc::new(ServiceBusEventQueue::from_env()?)),
        other => Err(EventQueueError::Config(format!(
            "unknown EVENT_QUEUE_BACKEND {other:?}"
        ))),
    }
}

/// In-process queue for local development and tests. Same at-least-once
/// settlement contract as the durable backend, minus persistence.
#[derive(Default)]
pub struct MemoryEventQueue {
    pending: Mutex<VecDeque<(Uuid, String)>>,
    inflight: Mutex<HashMap<Uuid, String>>,
}

impl MemoryEventQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventQueue for MemoryEventQueue {
    fn enqueue(&self, body: &str) -> Result<(), EventQueueError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| EventQueueError::LockPoisoned)?;
        pending.push_back((Uuid::new_v4(), body.to_string()));
        Ok(())
    }

    fn receive(&self) -> Result<Option<QueuedEvent>, EventQueueError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| EventQueueError::LockPoisoned)?;
        let Some((id, body)) = pending.pop_front() else {
            return Ok(None);
        };
        let mut inflight = self
            .inflight
            .lock()
            .map_err(|_| EventQueueError::LockPoisoned)?;
        inflight.insert(id, body.clone());
        Ok(Some(QueuedEvent { id, body }))
    }

    fn ack(&self, id: &Uuid) -> Result<(), EventQueueError> {
        let mut inflight = self
            .inflight
            .lock()
            .map_err(|_| EventQueueError::LockPoisoned)?;
        inflight
            .remove(id)
            .map(|_| ())
            .ok_or(EventQueueError::MissingLock(*id))
    }

    fn nack(&self, id: &Uuid) -> Result<(), EventQueueError> {
        let mut inflight = self
            .inflight
            .lock()
            .map_err(|_| EventQueueError::LockPoisoned)?;
        let body = inflight
            .remove(id)
            .ok_or(EventQueueError::MissingLock(*id))?;
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| EventQueueError::LockPoisoned)?;
        pending.push_front((*id, body));
        Ok(())
    }
}
