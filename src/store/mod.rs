//! Handle store
//!
//! Owns the map of source type to proxy handle and is the only writer of
//! stored handles. Every mutation of one source type happens under that
//! type's slot lock; the map itself is only write-locked to remove a slot,
//! so work on different source types never serializes.
//!
//! Lock order is coordinator, then map, then slot, then event bus. Listener
//! code never runs under any of them.

pub mod coordinator;

pub use coordinator::{ComputationCoordinator, ComputeFailure, FailureKind};

use crate::error::{HandleError, HandleResult};
use crate::events::{EventBus, EventListener, EventType, LifecycleEvent, Subscription};
use crate::handle::{HandleId, HandleStatus, ProxyHandle, SourceType};
use chrono::Utc;
use coordinator::{Admission, Outcome};
use futures_util::FutureExt;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Options for one `compute` call
#[derive(Debug, Clone, Default)]
pub struct ComputeOptions {
    human_label: String,
    force: bool,
    ttl: Option<Duration>,
    timeout: Option<Duration>,
    source_hash: Option<String>,
}

impl ComputeOptions {
    /// Options attributed to `human_label`, the actor triggering the computation
    pub fn new(human_label: impl Into<String>) -> Self {
        Self {
            human_label: human_label.into(),
            ..Self::default()
        }
    }

    /// Recompute even when a fresh, unexpired handle exists
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Expire the resulting handle `ttl` after it completes
    pub fn ttl(mut self, ttl: impl Into<Option<Duration>>) -> Self {
        self.ttl = ttl.into();
        self
    }

    /// Deadline for this call. Marks the computation ERROR when this call
    /// leads it; only bounds the wait when it joins another leader.
    pub fn timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Fingerprint of the source data being computed from
    pub fn source_hash(mut self, hash: impl Into<String>) -> Self {
        self.source_hash = Some(hash.into());
        self
    }

    pub fn human_label(&self) -> &str {
        &self.human_label
    }

    fn validated_label(&self) -> HandleResult<String> {
        let label = self.human_label.trim();
        if label.is_empty() {
            return Err(HandleError::invalid(
                "compute requires a non-empty human label",
            ));
        }
        Ok(label.to_string())
    }
}

/// Anything that can downgrade a source type's handle to STALE
pub trait Invalidator: Send + Sync {
    /// Invalidate with structured `cause` attached to the published events.
    /// Returns whether a FRESH handle was flipped.
    fn invalidate_with_cause(&self, source_type: &SourceType, cause: serde_json::Value) -> bool;
}

type Slot<T> = Mutex<Option<ProxyHandle<T>>>;

struct StoreInner<T> {
    slots: RwLock<HashMap<SourceType, Slot<T>>>,
    coordinator: ComputationCoordinator<T>,
    events: EventBus,
}

/// Store of proxy handles keyed by source type
///
/// Cloning is cheap and yields another reference to the same store.
pub struct HandleStore<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for HandleStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for HandleStore<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleStore<T>
where
    T: Send + Sync + 'static,
{
    /// Create an empty store with its own event bus
    pub fn new() -> Self {
        Self::with_event_bus(EventBus::new())
    }

    /// Create an empty store publishing on `events`
    pub fn with_event_bus(events: EventBus) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                slots: RwLock::new(HashMap::new()),
                coordinator: ComputationCoordinator::new(),
                events,
            }),
        }
    }

    /// Current handle, if one has been computed
    ///
    /// Never waits on a computation. Records the access and flips a FRESH
    /// handle whose TTL has passed to STALE before returning it.
    pub fn get<Q>(&self, source_type: &Q) -> Option<ProxyHandle<T>>
    where
        SourceType: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Utc::now();
        self.inner
            .with_existing_slot(source_type, |slot| {
                let handle = slot.as_mut()?;
                if handle.expire_if_due(now) {
                    debug!("Handle for {} expired", handle.source_type());
                    self.inner.publish_stale(handle, serde_json::json!({"reason": "ttl_expired"}));
                }
                handle.record_access(now);
                self.inner.publish(
                    LifecycleEvent::new(
                        EventType::HandleAccessed,
                        handle.source_type().clone(),
                        Some(handle.handle_id()),
                    )
                    .with_details(serde_json::json!({
                        "status": handle.status(),
                        "access_count": handle.access_count(),
                    })),
                );
                Some(handle.clone())
            })
            .flatten()
    }

    /// Like [`get`](Self::get), but a missing handle is an error
    pub fn get_or_raise<Q>(&self, source_type: &Q) -> HandleResult<ProxyHandle<T>>
    where
        SourceType: Borrow<Q>,
        Q: Hash + Eq + ToOwned + ?Sized,
        Q::Owned: Into<SourceType>,
    {
        self.get(source_type)
            .ok_or_else(|| HandleError::NoProxyHandle(source_type.to_owned().into()))
    }

    /// Create or refresh the handle for `source_type`
    ///
    /// Concurrent calls for one source type share a single invocation of
    /// `compute_fn` and receive the same handle. A FRESH, unexpired handle
    /// is returned as is unless `options.force` is set. Requires a tokio
    /// runtime: the computation runs on its own task so that it completes
    /// even if this call is dropped.
    pub async fn compute<F, Fut, E>(
        &self,
        source_type: impl Into<SourceType>,
        compute_fn: F,
        options: ComputeOptions,
    ) -> HandleResult<ProxyHandle<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let source_type = source_type.into();
        let label = options.validated_label()?;

        let admission = self.inner.coordinator.admit(&source_type, || {
            if !options.force {
                if let Some(handle) = self.inner.fresh_handle(&source_type) {
                    debug!("Reusing fresh handle for {}", source_type);
                    return Admission::Ready(handle);
                }
            }

            let handle_id = HandleId::new();
            self.inner.begin(&source_type, handle_id, &label);
            let outcome = Arc::clone(&self.inner).launch(
                source_type.clone(),
                handle_id,
                label,
                compute_fn,
                &options,
            );
            Admission::Led { handle_id, outcome }
        });

        match admission {
            Admission::Ready(handle) => Ok(handle),
            Admission::Led { outcome, .. } => outcome.await.map_err(HandleError::from),
            Admission::Joined { handle_id, outcome } => match options.timeout {
                Some(limit) => match tokio::time::timeout(limit, outcome).await {
                    Ok(result) => result.map_err(HandleError::from),
                    Err(_) => {
                        debug!(
                            "Stopped waiting on computation {} for {} after {:?}",
                            handle_id, source_type, limit
                        );
                        Err(HandleError::Timeout {
                            source_type,
                            handle_id: Some(handle_id),
                            elapsed: limit,
                        })
                    }
                },
                None => outcome.await.map_err(HandleError::from),
            },
        }
    }

    /// Flip a FRESH handle to STALE
    ///
    /// No-op when no handle exists or it is not FRESH. Data is kept.
    pub fn invalidate<Q>(&self, source_type: &Q) -> bool
    where
        SourceType: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner
            .invalidate(source_type, serde_json::json!({"reason": "explicit"}))
    }

    /// Remove the handle entirely. Returns whether one existed.
    ///
    /// A computation in flight is not cancelled; its result is stored when
    /// it completes.
    pub fn delete<Q>(&self, source_type: &Q) -> bool
    where
        SourceType: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut slots = self.inner.write_slots();
        let Some((key, slot)) = slots.remove_entry(source_type) else {
            return false;
        };

        let removed = slot.into_inner().unwrap_or_else(PoisonError::into_inner);
        let Some(handle) = removed else {
            return false;
        };

        info!("Deleted handle for {}", key);
        self.inner.publish(
            LifecycleEvent::new(EventType::HandleDeleted, key, Some(handle.handle_id()))
                .with_details(serde_json::json!({"status": handle.status()})),
        );
        true
    }

    /// Register a typed listener for all lifecycle events
    pub fn subscribe(&self, listener: Arc<dyn EventListener>) -> Subscription {
        self.inner.events.subscribe(listener)
    }

    /// Receive all lifecycle events on a channel
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<LifecycleEvent>) {
        self.inner.events.subscribe_channel()
    }

    /// The bus this store publishes on
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Snapshots of every stored handle, ordered by source type
    ///
    /// Does not count as an access.
    pub fn handles(&self) -> Vec<ProxyHandle<T>> {
        let slots = self.inner.read_slots();
        let mut handles: Vec<ProxyHandle<T>> = slots
            .values()
            .filter_map(|slot| lock_slot(slot).clone())
            .collect();
        handles.sort_by(|a, b| a.source_type().cmp(b.source_type()));
        handles
    }

    /// Whether a handle exists, without counting an access
    pub fn contains<Q>(&self, source_type: &Q) -> bool
    where
        SourceType: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner
            .with_existing_slot(source_type, |slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Number of stored handles
    pub fn len(&self) -> usize {
        self.inner
            .read_slots()
            .values()
            .filter(|slot| lock_slot(slot).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a computation for `source_type` is running
    pub fn is_computing(&self, source_type: &SourceType) -> bool {
        self.inner.coordinator.in_flight(source_type).is_some()
    }
}

impl<T> Invalidator for HandleStore<T>
where
    T: Send + Sync + 'static,
{
    fn invalidate_with_cause(&self, source_type: &SourceType, cause: serde_json::Value) -> bool {
        self.inner.invalidate(source_type, cause)
    }
}

impl<T> StoreInner<T>
where
    T: Send + Sync + 'static,
{
    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SourceType, Slot<T>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SourceType, Slot<T>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on an existing slot. `None` when the source type has no slot.
    fn with_existing_slot<Q, R>(
        &self,
        source_type: &Q,
        f: impl FnOnce(&mut Option<ProxyHandle<T>>) -> R,
    ) -> Option<R>
    where
        SourceType: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slots = self.read_slots();
        let slot = slots.get(source_type)?;
        let mut guard = lock_slot(slot);
        Some(f(&mut guard))
    }

    /// Run `f` on the slot for `source_type`, creating it if needed
    fn with_slot<R>(
        &self,
        source_type: &SourceType,
        f: impl FnOnce(&mut Option<ProxyHandle<T>>) -> R,
    ) -> R {
        {
            let slots = self.read_slots();
            if let Some(slot) = slots.get(source_type) {
                let mut guard = lock_slot(slot);
                return f(&mut guard);
            }
        }

        let mut slots = self.write_slots();
        let slot = slots.entry(source_type.clone()).or_default();
        f(slot.get_mut().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, event: LifecycleEvent) {
        self.events.publish(event);
    }

    fn publish_stale(&self, handle: &ProxyHandle<T>, cause: serde_json::Value) {
        self.publish(
            LifecycleEvent::new(
                EventType::HandleStale,
                handle.source_type().clone(),
                Some(handle.handle_id()),
            )
            .with_details(cause),
        );
    }

    fn invalidate<Q>(&self, source_type: &Q, cause: serde_json::Value) -> bool
    where
        SourceType: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.with_existing_slot(source_type, |slot| {
            let Some(handle) = slot.as_mut() else {
                return false;
            };
            if !handle.mark_stale() {
                debug!(
                    "Invalidate of {} ignored in status {}",
                    handle.source_type(),
                    handle.status()
                );
                return false;
            }

            info!("Invalidated handle for {}", handle.source_type());
            self.publish(
                LifecycleEvent::new(
                    EventType::HandleInvalidated,
                    handle.source_type().clone(),
                    Some(handle.handle_id()),
                )
                .with_details(cause.clone()),
            );
            self.publish_stale(handle, cause);
            true
        })
        .unwrap_or(false)
    }

    /// Snapshot of a FRESH, unexpired handle, recorded as an access
    fn fresh_handle(&self, source_type: &SourceType) -> Option<ProxyHandle<T>> {
        let now = Utc::now();
        self.with_existing_slot(source_type, |slot| {
            let handle = slot.as_mut()?;
            if handle.expire_if_due(now) {
                self.publish_stale(handle, serde_json::json!({"reason": "ttl_expired"}));
            }
            if !handle.is_fresh() {
                return None;
            }
            handle.record_access(now);
            self.publish(LifecycleEvent::new(
                EventType::HandleAccessed,
                source_type.clone(),
                Some(handle.handle_id()),
            ));
            Some(handle.clone())
        })
        .flatten()
    }

    /// EMPTY/FRESH/STALE/ERROR -> COMPUTING
    fn begin(&self, source_type: &SourceType, handle_id: HandleId, label: &str) {
        self.with_slot(source_type, |slot| {
            let previous = slot.as_ref().map(|h| h.status()).unwrap_or(HandleStatus::Empty);
            *slot = Some(ProxyHandle::computing(
                source_type.clone(),
                handle_id,
                label.to_string(),
                slot.as_ref(),
            ));
            self.publish(
                LifecycleEvent::new(
                    EventType::ComputationStarted,
                    source_type.clone(),
                    Some(handle_id),
                )
                .with_details(serde_json::json!({
                    "computed_by": label,
                    "previous_status": previous,
                })),
            );
        });
        info!("Computing {} ({}) for {}", source_type, handle_id, label);
    }

    /// Spawn the computation and return the future every waiter shares
    fn launch<F, Fut, E>(
        self: Arc<Self>,
        source_type: SourceType,
        handle_id: HandleId,
        label: String,
        compute_fn: F,
        options: &ComputeOptions,
    ) -> coordinator::SharedOutcome<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let ttl = options.ttl;
        let timeout = options.timeout;
        let source_hash = options.source_hash.clone();

        let task = {
            let inner = Arc::clone(&self);
            let source_type = source_type.clone();
            let label = label.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let result = run_guarded(compute_fn, timeout).await;
                let elapsed = started.elapsed();

                let result = result.map_err(|error| match error {
                    RunError::Failed(message) => {
                        ComputeFailure::failed(source_type.clone(), handle_id, message, elapsed)
                    }
                    RunError::TimedOut(limit) => {
                        ComputeFailure::timed_out(source_type.clone(), handle_id, limit)
                    }
                });
                let outcome =
                    inner.settle(&source_type, handle_id, &label, result, elapsed, ttl, source_hash);
                inner.coordinator.release(&source_type, handle_id);
                outcome
            })
        };

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    // The task never reached settle, e.g. the runtime shut down
                    let failure = ComputeFailure::failed(
                        source_type.clone(),
                        handle_id,
                        format!("computation task aborted: {}", join_error),
                        Duration::ZERO,
                    );
                    let outcome = self.settle(
                        &source_type,
                        handle_id,
                        &label,
                        Err(failure),
                        Duration::ZERO,
                        None,
                        None,
                    );
                    self.coordinator.release(&source_type, handle_id);
                    outcome
                }
            }
        }
        .boxed()
        .shared()
    }

    /// COMPUTING -> FRESH or ERROR, publishing the completion event
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        source_type: &SourceType,
        handle_id: HandleId,
        label: &str,
        result: Result<T, ComputeFailure>,
        elapsed: Duration,
        ttl: Option<Duration>,
        source_hash: Option<String>,
    ) -> Outcome<T> {
        self.with_slot(source_type, |slot| {
            let mut handle = match slot.take() {
                Some(current)
                    if current.handle_id() == handle_id
                        && current.status() == HandleStatus::Computing =>
                {
                    current
                }
                // Deleted while computing
                other => ProxyHandle::computing(
                    source_type.clone(),
                    handle_id,
                    label.to_string(),
                    other.as_ref(),
                ),
            };

            match result {
                Ok(value) => {
                    handle.complete(value, elapsed, ttl, source_hash);
                    info!(
                        "Computed {} in {:?} (count {})",
                        source_type,
                        elapsed,
                        handle.computation_count()
                    );
                    self.publish(
                        LifecycleEvent::new(
                            EventType::ComputationCompleted,
                            source_type.clone(),
                            Some(handle_id),
                        )
                        .with_details(serde_json::json!({
                            "computed_by": label,
                            "duration_ms": elapsed.as_millis() as u64,
                            "computation_count": handle.computation_count(),
                        })),
                    );
                    *slot = Some(handle.clone());
                    Ok(handle)
                }
                Err(failure) => {
                    handle.fail(failure.message.clone(), elapsed);
                    warn!("Computation of {} failed: {}", source_type, failure);
                    self.publish(
                        LifecycleEvent::new(
                            EventType::ComputationFailed,
                            source_type.clone(),
                            Some(handle_id),
                        )
                        .with_details(serde_json::json!({
                            "computed_by": label,
                            "error": failure.message,
                            "timed_out": failure.kind == FailureKind::TimedOut,
                        })),
                    );
                    *slot = Some(handle);
                    Err(failure)
                }
            }
        })
    }
}

fn lock_slot<T>(slot: &Slot<T>) -> std::sync::MutexGuard<'_, Option<ProxyHandle<T>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

enum RunError {
    Failed(String),
    TimedOut(Duration),
}

/// Run `compute_fn` once, turning errors, panics and deadline overruns
/// into a `RunError`
async fn run_guarded<T, F, Fut, E>(compute_fn: F, timeout: Option<Duration>) -> Result<T, RunError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let work = AssertUnwindSafe(async move { compute_fn().await }).catch_unwind();

    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(caught) => caught,
            Err(_) => return Err(RunError::TimedOut(limit)),
        },
        None => work.await,
    };

    match caught {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(RunError::Failed(e.to_string())),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(RunError::Failed(format!("computation panicked: {}", message)))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Widgets {
        count: u32,
    }

    type WidgetsFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<Widgets, String>> + Send>;

    fn widgets_fn(calls: &Arc<AtomicUsize>, count: u32) -> WidgetsFn {
        let calls = calls.clone();
        Box::new(move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(Widgets { count })
            }
            .boxed()
        })
    }

    fn slow_widgets_fn(calls: &Arc<AtomicUsize>, delay: Duration) -> WidgetsFn {
        let calls = calls.clone();
        Box::new(move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok::<_, String>(Widgets { count: 7 })
            }
            .boxed()
        })
    }

    fn failing_fn(message: &'static str) -> WidgetsFn {
        Box::new(move || async move { Err::<Widgets, _>(message.to_string()) }.boxed())
    }

    fn never_called() -> WidgetsFn {
        Box::new(|| -> BoxFuture<'static, Result<Widgets, String>> {
            panic!("compute_fn must not be invoked")
        })
    }

    async fn wait_until_computing(store: &HandleStore<Widgets>, source_type: &str) {
        let source_type = SourceType::from(source_type);
        tokio::time::timeout(Duration::from_secs(2), async {
            while !store.is_computing(&source_type) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn no_implicit_creation() {
        let store = HandleStore::<Widgets>::new();

        assert!(store.get("widgets").is_none());
        assert!(matches!(
            store.get_or_raise("widgets"),
            Err(HandleError::NoProxyHandle(st)) if st.as_str() == "widgets"
        ));
        assert!(!store.invalidate("widgets"));
        assert!(!store.delete("widgets"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn widgets_lifecycle() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = store
            .compute("widgets", widgets_fn(&calls, 3), ComputeOptions::new("test"))
            .await
            .unwrap();
        assert_eq!(first.status(), HandleStatus::Fresh);
        assert_eq!(first.data().unwrap().count, 3);
        assert_eq!(first.computation_count(), 1);
        assert_eq!(first.computed_by(), "test");

        let again = store
            .compute("widgets", widgets_fn(&calls, 4), ComputeOptions::new("test"))
            .await
            .unwrap();
        assert_eq!(again.handle_id(), first.handle_id());
        assert_eq!(again.computation_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(store.invalidate("widgets"));
        let stale = store.get("widgets").unwrap();
        assert_eq!(stale.status(), HandleStatus::Stale);
        assert_eq!(stale.data().unwrap().count, 3);

        let refreshed = store
            .compute(
                "widgets",
                widgets_fn(&calls, 5),
                ComputeOptions::new("test").force(true),
            )
            .await
            .unwrap();
        assert_eq!(refreshed.status(), HandleStatus::Fresh);
        assert_eq!(refreshed.data().unwrap().count, 5);
        assert_eq!(refreshed.computation_count(), 2);
        assert_ne!(refreshed.handle_id(), first.handle_id());
    }

    #[tokio::test]
    async fn empty_label_is_rejected_before_computing() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = store
            .compute("widgets", widgets_fn(&calls, 1), ComputeOptions::new("   "))
            .await;

        assert!(matches!(result, Err(HandleError::InvalidArgument(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.get("widgets").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_computes_share_one_invocation() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let callers = 32;
        let barrier = Arc::new(tokio::sync::Barrier::new(callers));

        let mut tasks = Vec::new();
        for i in 0..callers {
            let store = store.clone();
            let barrier = barrier.clone();
            let compute_fn = slow_widgets_fn(&calls, Duration::from_millis(100));
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                store
                    .compute(
                        "widgets",
                        compute_fn,
                        ComputeOptions::new(format!("caller-{}", i)).force(i % 2 == 0),
                    )
                    .await
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().handle_id());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert!(!store.is_computing(&SourceType::from("widgets")));
    }

    #[tokio::test]
    async fn second_invalidate_is_noop() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        store
            .compute("widgets", widgets_fn(&calls, 3), ComputeOptions::new("test"))
            .await
            .unwrap();

        assert!(store.invalidate("widgets"));
        assert!(!store.invalidate("widgets"));
        assert_eq!(store.get("widgets").unwrap().status(), HandleStatus::Stale);
    }

    #[tokio::test]
    async fn ttl_expiry_is_observed_on_get() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (_subscription, mut rx) = store.subscribe_channel();

        store
            .compute(
                "widgets",
                widgets_fn(&calls, 3),
                ComputeOptions::new("test").ttl(Duration::from_millis(1)),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let handle = store.get("widgets").unwrap();
        assert_eq!(handle.status(), HandleStatus::Stale);
        assert_eq!(handle.data().unwrap().count, 3);

        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type);
        }
        assert_eq!(
            types,
            vec![
                EventType::ComputationStarted,
                EventType::ComputationCompleted,
                EventType::HandleStale,
                EventType::HandleAccessed,
            ]
        );
    }

    #[tokio::test]
    async fn expired_handle_is_recomputed_without_force() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = ComputeOptions::new("test").ttl(Duration::from_millis(1));

        store
            .compute("widgets", widgets_fn(&calls, 1), options.clone())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let handle = store
            .compute("widgets", widgets_fn(&calls, 2), options)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.data().unwrap().count, 2);
    }

    #[tokio::test]
    async fn failure_then_recovery() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let err = store
            .compute("widgets", failing_fn("boom"), ComputeOptions::new("test"))
            .await
            .unwrap_err();
        assert!(matches!(err, HandleError::Computation { ref message, .. } if message == "boom"));

        let failed = store.get("widgets").unwrap();
        assert_eq!(failed.status(), HandleStatus::Error);
        assert_eq!(failed.error(), Some("boom"));
        assert!(failed.data().is_none());

        let recovered = store
            .compute("widgets", widgets_fn(&calls, 9), ComputeOptions::new("test"))
            .await
            .unwrap();
        assert_eq!(recovered.status(), HandleStatus::Fresh);
        assert!(recovered.error().is_none());
        assert_eq!(recovered.data().unwrap().count, 9);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_known_good() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        store
            .compute("widgets", widgets_fn(&calls, 3), ComputeOptions::new("test"))
            .await
            .unwrap();

        let _ = store
            .compute(
                "widgets",
                failing_fn("source unreachable"),
                ComputeOptions::new("test").force(true),
            )
            .await;

        let handle = store.get("widgets").unwrap();
        assert!(handle.is_error());
        assert!(handle.data().is_none());
        assert_eq!(handle.fallback_data().unwrap().count, 3);
        assert_eq!(handle.computation_count(), 1);
    }

    #[tokio::test]
    async fn panicking_compute_becomes_error() {
        let store = HandleStore::<Widgets>::new();

        let err = store
            .compute("widgets", never_called(), ComputeOptions::new("test"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("panicked"));
        assert!(store.get("widgets").unwrap().is_error());
        assert!(!store.is_computing(&SourceType::from("widgets")));
    }

    #[tokio::test]
    async fn leader_timeout_fails_every_waiter() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let leader = {
            let store = store.clone();
            let compute_fn = slow_widgets_fn(&calls, Duration::from_secs(30));
            tokio::spawn(async move {
                store
                    .compute(
                        "widgets",
                        compute_fn,
                        ComputeOptions::new("leader").timeout(Duration::from_millis(50)),
                    )
                    .await
            })
        };
        wait_until_computing(&store, "widgets").await;

        let follower = store
            .compute("widgets", never_called(), ComputeOptions::new("follower"))
            .await;

        assert!(matches!(follower, Err(HandleError::Timeout { .. })));
        assert!(matches!(
            leader.await.unwrap(),
            Err(HandleError::Timeout { .. })
        ));

        let handle = store.get("widgets").unwrap();
        assert!(handle.is_error());
        assert!(handle.error().unwrap().contains("deadline"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn follower_timeout_leaves_leader_running() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let leader = {
            let store = store.clone();
            let compute_fn = slow_widgets_fn(&calls, Duration::from_millis(150));
            tokio::spawn(async move {
                store
                    .compute("widgets", compute_fn, ComputeOptions::new("leader"))
                    .await
            })
        };
        wait_until_computing(&store, "widgets").await;

        let follower = store
            .compute(
                "widgets",
                never_called(),
                ComputeOptions::new("follower").timeout(Duration::from_millis(10)),
            )
            .await;
        assert!(matches!(follower, Err(HandleError::Timeout { .. })));

        let handle = leader.await.unwrap().unwrap();
        assert!(handle.is_fresh());
        assert_eq!(store.get("widgets").unwrap().status(), HandleStatus::Fresh);
    }

    #[tokio::test]
    async fn computing_handle_is_visible_and_not_invalidated() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let leader = {
            let store = store.clone();
            let compute_fn = slow_widgets_fn(&calls, Duration::from_millis(100));
            tokio::spawn(async move {
                store
                    .compute("widgets", compute_fn, ComputeOptions::new("leader"))
                    .await
            })
        };
        wait_until_computing(&store, "widgets").await;

        let computing = store.get("widgets").unwrap();
        assert_eq!(computing.status(), HandleStatus::Computing);
        assert!(!store.invalidate("widgets"));

        let done = leader.await.unwrap().unwrap();
        assert_eq!(done.handle_id(), computing.handle_id());
    }

    #[tokio::test]
    async fn delete_removes_handle_and_lineage() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        store
            .compute("widgets", widgets_fn(&calls, 3), ComputeOptions::new("test"))
            .await
            .unwrap();

        assert!(store.delete("widgets"));
        assert!(store.get("widgets").is_none());
        assert!(!store.delete("widgets"));

        let handle = store
            .compute("widgets", widgets_fn(&calls, 4), ComputeOptions::new("test"))
            .await
            .unwrap();
        assert_eq!(handle.computation_count(), 1);
    }

    #[tokio::test]
    async fn events_follow_transition_order() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (_subscription, mut rx) = store.subscribe_channel();

        let handle = store
            .compute("widgets", widgets_fn(&calls, 3), ComputeOptions::new("test"))
            .await
            .unwrap();
        store.invalidate("widgets");
        store.delete("widgets");

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::ComputationStarted,
                EventType::ComputationCompleted,
                EventType::HandleInvalidated,
                EventType::HandleStale,
                EventType::HandleDeleted,
            ]
        );
        assert!(events
            .iter()
            .all(|e| e.handle_id == Some(handle.handle_id())));
        assert_eq!(events[1].details["computed_by"], "test");
    }

    #[tokio::test]
    async fn listener_may_call_back_into_store() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (_subscription, mut rx) = store.subscribe_channel();

        let reentrant = store.clone();
        let _listener = store.subscribe(Arc::new(move |event: &LifecycleEvent| {
            if event.event_type == EventType::ComputationCompleted {
                reentrant.invalidate(&event.source_type);
            }
        }));

        store
            .compute("widgets", widgets_fn(&calls, 3), ComputeOptions::new("test"))
            .await
            .unwrap();

        let stale = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = rx.recv().await {
                if event.event_type == EventType::HandleStale {
                    return event;
                }
            }
            panic!("event stream closed");
        })
        .await
        .unwrap();
        assert_eq!(stale.source_type.as_str(), "widgets");
        assert!(store.get("widgets").unwrap().is_stale());
    }

    #[tokio::test]
    async fn source_types_are_independent() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = {
            let store = store.clone();
            let compute_fn = slow_widgets_fn(&calls, Duration::from_millis(100));
            tokio::spawn(async move {
                store
                    .compute("slow", compute_fn, ComputeOptions::new("test"))
                    .await
            })
        };
        wait_until_computing(&store, "slow").await;

        let quick = store
            .compute(
                "quick",
                widgets_fn(&calls, 1),
                ComputeOptions::new("test").source_hash("abc123"),
            )
            .await
            .unwrap();
        assert!(quick.is_fresh());
        assert_eq!(quick.source_hash(), Some("abc123"));
        assert!(store.is_computing(&SourceType::from("slow")));

        slow.await.unwrap().unwrap();
        let listed: Vec<String> = store
            .handles()
            .iter()
            .map(|h| h.source_type().to_string())
            .collect();
        assert_eq!(listed, vec!["quick", "slow"]);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn get_records_access() {
        let store = HandleStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        store
            .compute("widgets", widgets_fn(&calls, 3), ComputeOptions::new("test"))
            .await
            .unwrap();

        store.get("widgets");
        let handle = store.get("widgets").unwrap();
        assert_eq!(handle.access_count(), 2);
        assert!(store.contains("widgets"));
    }
}
