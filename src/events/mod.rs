//! Lifecycle event bus
//!
//! The store publishes one [`LifecycleEvent`] per state transition. Each
//! subscriber owns an unbounded channel, so publishing never runs listener
//! code: it only enqueues. Events for one source type reach every
//! subscriber in the order the transitions happened.

pub mod log;

pub use log::EventLog;

use crate::handle::{HandleId, SourceType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// Kind of lifecycle transition being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ComputationStarted,
    ComputationCompleted,
    ComputationFailed,
    HandleAccessed,
    HandleStale,
    HandleInvalidated,
    HandleDeleted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ComputationStarted => "computation_started",
            Self::ComputationCompleted => "computation_completed",
            Self::ComputationFailed => "computation_failed",
            Self::HandleAccessed => "handle_accessed",
            Self::HandleStale => "handle_stale",
            Self::HandleInvalidated => "handle_invalidated",
            Self::HandleDeleted => "handle_deleted",
        };
        f.pad(name)
    }
}

/// Event payload delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event_type: EventType,
    pub source_type: SourceType,
    pub handle_id: Option<HandleId>,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

impl LifecycleEvent {
    /// Create an event stamped with the current time and empty details
    pub fn new(event_type: EventType, source_type: SourceType, handle_id: Option<HandleId>) -> Self {
        Self {
            event_type,
            source_type,
            handle_id,
            timestamp: Utc::now(),
            details: serde_json::Value::Null,
        }
    }

    /// Attach structured details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Typed observer of lifecycle events
///
/// Listeners run on their own task, never while the store holds a handle
/// lock, so a listener may call back into the store.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &LifecycleEvent);
}

#[async_trait]
impl<F> EventListener for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    async fn on_event(&self, event: &LifecycleEvent) {
        self(event)
    }
}

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<LifecycleEvent>,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Fan-out of lifecycle events to zero or more subscribers
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusState>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe with a native channel receiver
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock_state();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push(Subscriber { id, sender });
        debug!("Registered event subscriber {}", id);

        let subscription = Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        };
        (subscription, receiver)
    }

    /// Register a listener; it is driven by a task on the current tokio runtime
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn subscribe(&self, listener: Arc<dyn EventListener>) -> Subscription {
        let (subscription, mut receiver) = self.subscribe_channel();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                listener.on_event(&event).await;
            }
        });
        subscription
    }

    /// Enqueue an event for every live subscriber
    pub fn publish(&self, event: LifecycleEvent) {
        let mut state = self.lock_state();
        // Receivers that went away are pruned here
        state
            .subscribers
            .retain(|subscriber| subscriber.sender.send(event.clone()).is_ok());
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock_state().subscribers.len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration returned by `subscribe`; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    bus: Weak<Mutex<BusState>>,
}

impl Subscription {
    /// Stop receiving events
    pub fn unsubscribe(self) {
        drop(self)
    }

    /// Subscriber id, unique within its bus
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
            state.subscribers.retain(|subscriber| subscriber.id != self.id);
            debug!("Removed event subscriber {}", self.id);
        }
    }
}
