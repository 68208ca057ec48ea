//! Push-based invalidation
//!
//! The reactor bridges a [`ChangeTransport`] the engine does not own to the
//! store's `invalidate`. Each trigger maps one topic to the source types
//! that become stale when a matching change event arrives. The reactor never
//! computes anything and never polls sources.

pub mod local;
pub mod trigger;

pub use local::LocalTransport;
pub use trigger::{InvalidationTrigger, TriggerFilter};

use crate::error::HandleResult;
use crate::store::Invalidator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A "source changed" signal delivered by a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub topic: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Stream of change events for one topic. `Err` items are non-fatal
/// transport problems (e.g. a lagging subscriber).
pub type ChangeStream = BoxStream<'static, HandleResult<ChangeEvent>>;

/// External change-notification mechanism
#[async_trait]
pub trait ChangeTransport: Send + Sync {
    /// Subscribe to `topic`. The stream ends when the transport closes it.
    async fn subscribe(&self, topic: &str) -> HandleResult<ChangeStream>;
}

/// Counters describing what the reactor has done
#[derive(Debug, Default)]
pub struct ReactorStats {
    events_received: AtomicU64,
    invalidations: AtomicU64,
    filtered: AtomicU64,
    failures: AtomicU64,
    transport_errors: AtomicU64,
}

/// Point-in-time copy of [`ReactorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReactorSnapshot {
    pub events_received: u64,
    pub invalidations: u64,
    pub filtered: u64,
    pub failures: u64,
    pub transport_errors: u64,
}

impl ReactorStats {
    pub fn snapshot(&self) -> ReactorSnapshot {
        ReactorSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Subscribes triggers to a transport and invalidates on matching events
pub struct InvalidationReactor {
    triggers: Vec<InvalidationTrigger>,
    stats: Arc<ReactorStats>,
}

impl InvalidationReactor {
    /// Create a reactor for `triggers`
    pub fn new(triggers: Vec<InvalidationTrigger>) -> Self {
        Self {
            triggers,
            stats: Arc::new(ReactorStats::default()),
        }
    }

    pub fn triggers(&self) -> &[InvalidationTrigger] {
        &self.triggers
    }

    /// Subscribe every trigger, then process events on background tasks
    ///
    /// All subscriptions are established before this returns, so events
    /// published afterwards are observed.
    pub async fn start(
        self,
        store: Arc<dyn Invalidator>,
        transport: &dyn ChangeTransport,
    ) -> HandleResult<ReactorHandle> {
        let mut streams = Vec::with_capacity(self.triggers.len());
        for trigger in &self.triggers {
            let stream = transport.subscribe(&trigger.topic).await?;
            debug!(
                "Subscribed to {} for {} source type(s)",
                trigger.topic,
                trigger.source_types.len()
            );
            streams.push(stream);
        }

        let tasks = self
            .triggers
            .into_iter()
            .zip(streams)
            .map(|(trigger, stream)| {
                tokio::spawn(run_trigger(
                    trigger,
                    stream,
                    store.clone(),
                    self.stats.clone(),
                ))
            })
            .collect::<Vec<_>>();

        info!("Invalidation reactor started with {} trigger(s)", tasks.len());
        Ok(ReactorHandle {
            tasks,
            stats: self.stats,
        })
    }
}

/// Running reactor
pub struct ReactorHandle {
    tasks: Vec<JoinHandle<()>>,
    stats: Arc<ReactorStats>,
}

impl ReactorHandle {
    pub fn stats(&self) -> ReactorSnapshot {
        self.stats.snapshot()
    }

    /// Stop processing immediately
    pub fn shutdown(self) -> ReactorSnapshot {
        for task in &self.tasks {
            task.abort();
        }
        self.stats.snapshot()
    }

    /// Wait until every trigger's stream has ended
    pub async fn join(self) -> ReactorSnapshot {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Reactor trigger task ended abnormally: {}", e);
            }
        }
        self.stats.snapshot()
    }
}

async fn run_trigger(
    trigger: InvalidationTrigger,
    mut stream: ChangeStream,
    store: Arc<dyn Invalidator>,
    stats: Arc<ReactorStats>,
) {
    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                ReactorStats::bump(&stats.transport_errors);
                warn!("Change transport error on {}: {}", trigger.topic, e);
                continue;
            }
        };

        ReactorStats::bump(&stats.events_received);
        let handled = catch_unwind(AssertUnwindSafe(|| {
            apply_event(&trigger, &event, store.as_ref(), &stats)
        }));
        if handled.is_err() {
            ReactorStats::bump(&stats.failures);
            warn!(
                "Failed to process change event on {}; continuing",
                trigger.topic
            );
        }
    }
    debug!("Change stream for {} closed", trigger.topic);
}

fn apply_event(
    trigger: &InvalidationTrigger,
    event: &ChangeEvent,
    store: &dyn Invalidator,
    stats: &ReactorStats,
) {
    if !trigger.accepts(event) {
        ReactorStats::bump(&stats.filtered);
        debug!("Change event on {} rejected by filter", event.topic);
        return;
    }

    let cause = serde_json::json!({
        "reason": "change_event",
        "topic": event.topic,
    });
    for source_type in &trigger.source_types {
        if store.invalidate_with_cause(source_type, cause.clone()) {
            ReactorStats::bump(&stats.invalidations);
        }
    }
}
