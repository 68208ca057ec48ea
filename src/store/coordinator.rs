//! Singleflight coordination of computations
//!
//! At most one computation per source type executes at any instant. The
//! first caller becomes the leader and registers a shared future; callers
//! arriving while it is registered join that future and observe the same
//! handle or the same failure.

use crate::error::HandleError;
use crate::handle::{HandleId, ProxyHandle, SourceType};
use futures_util::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Result every participant of one computation observes
pub(crate) type Outcome<T> = Result<ProxyHandle<T>, ComputeFailure>;

/// Cloneable future resolving to the outcome of one computation
pub(crate) type SharedOutcome<T> = Shared<BoxFuture<'static, Outcome<T>>>;

/// How a computation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// `compute_fn` returned an error or panicked
    Failed,
    /// The leader's deadline elapsed
    TimedOut,
}

/// A computation failure shared by every waiter
#[derive(Debug, Clone)]
pub struct ComputeFailure {
    pub kind: FailureKind,
    pub source_type: SourceType,
    pub handle_id: HandleId,
    pub message: String,
    pub elapsed: Duration,
}

impl ComputeFailure {
    pub(crate) fn failed(
        source_type: SourceType,
        handle_id: HandleId,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            kind: FailureKind::Failed,
            source_type,
            handle_id,
            message: message.into(),
            elapsed,
        }
    }

    pub(crate) fn timed_out(source_type: SourceType, handle_id: HandleId, limit: Duration) -> Self {
        Self {
            kind: FailureKind::TimedOut,
            source_type,
            handle_id,
            message: format!("computation exceeded deadline of {:?}", limit),
            elapsed: limit,
        }
    }
}

impl fmt::Display for ComputeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<ComputeFailure> for HandleError {
    fn from(failure: ComputeFailure) -> Self {
        match failure.kind {
            FailureKind::Failed => HandleError::Computation {
                source_type: failure.source_type,
                handle_id: failure.handle_id,
                message: failure.message,
            },
            FailureKind::TimedOut => HandleError::Timeout {
                source_type: failure.source_type,
                handle_id: Some(failure.handle_id),
                elapsed: failure.elapsed,
            },
        }
    }
}

/// How a `compute` call was admitted
pub(crate) enum Admission<T> {
    /// An existing fresh handle satisfied the call
    Ready(ProxyHandle<T>),
    /// The call started a new computation
    Led {
        handle_id: HandleId,
        outcome: SharedOutcome<T>,
    },
    /// The call joined a computation already in flight
    Joined {
        handle_id: HandleId,
        outcome: SharedOutcome<T>,
    },
}

struct InFlight<T> {
    handle_id: HandleId,
    outcome: SharedOutcome<T>,
}

/// Mutex-guarded map from source type to its in-flight computation
pub struct ComputationCoordinator<T> {
    in_flight: Mutex<HashMap<SourceType, InFlight<T>>>,
}

impl<T> ComputationCoordinator<T> {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Join the in-flight computation for `source_type`, or run `start`
    ///
    /// `start` runs under the coordinator lock, so no second leader can be
    /// admitted between its shortcut check and registration.
    pub(crate) fn admit(
        &self,
        source_type: &SourceType,
        start: impl FnOnce() -> Admission<T>,
    ) -> Admission<T> {
        let mut in_flight = self.lock();

        if let Some(flight) = in_flight.get(source_type) {
            debug!(
                "Joining in-flight computation {} for {}",
                flight.handle_id, source_type
            );
            return Admission::Joined {
                handle_id: flight.handle_id,
                outcome: flight.outcome.clone(),
            };
        }

        let admission = start();
        if let Admission::Led { handle_id, outcome } = &admission {
            debug!("Leading computation {} for {}", handle_id, source_type);
            in_flight.insert(
                source_type.clone(),
                InFlight {
                    handle_id: *handle_id,
                    outcome: outcome.clone(),
                },
            );
        }
        admission
    }

    /// Unregister a finished computation. Entries of other computations
    /// are left alone.
    pub(crate) fn release(&self, source_type: &SourceType, handle_id: HandleId) {
        let mut in_flight = self.lock();
        if in_flight
            .get(source_type)
            .is_some_and(|flight| flight.handle_id == handle_id)
        {
            in_flight.remove(source_type);
        }
    }

    /// Handle id of the computation currently in flight, if any
    pub fn in_flight(&self, source_type: &SourceType) -> Option<HandleId> {
        self.lock().get(source_type).map(|flight| flight.handle_id)
    }

    /// Number of source types with a computation in flight
    pub fn in_flight_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SourceType, InFlight<T>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for ComputationCoordinator<T> {
    fn default() -> Self {
        Self::new()
    }
}
