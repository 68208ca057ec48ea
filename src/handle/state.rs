//! Handle record and its lifecycle transitions

use crate::handle::ids::{HandleId, SourceType};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle state of a proxy handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleStatus {
    /// No handle exists. Never stored.
    Empty,
    Computing,
    Fresh,
    Stale,
    Error,
}

impl HandleStatus {
    /// Whether a handle in this state carries a payload
    pub fn has_data(&self) -> bool {
        matches!(self, Self::Fresh | Self::Stale)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: HandleStatus) -> bool {
        use HandleStatus::*;
        matches!(
            (self, next),
            (Empty | Stale | Error, Computing)
                | (Computing, Fresh | Error)
                | (Fresh, Stale)
                // a forced refresh of a fresh handle
                | (Fresh, Computing)
        )
    }
}

impl fmt::Display for HandleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Computing => "computing",
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// One computed artifact and its lifecycle metadata
///
/// Values handed out by the store are snapshots; mutating a snapshot never
/// affects the stored handle.
#[derive(Debug)]
pub struct ProxyHandle<T> {
    handle_id: HandleId,
    source_type: SourceType,
    status: HandleStatus,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    source_hash: Option<String>,
    data: Option<Arc<T>>,
    /// Last-known-good payload kept while refreshing or after a failed refresh
    last_good: Option<Arc<T>>,
    error: Option<String>,
    computed_by: String,
    computation_duration: Duration,
    computation_count: u64,
    last_accessed: DateTime<Utc>,
    access_count: u64,
}

impl<T> Clone for ProxyHandle<T> {
    fn clone(&self) -> Self {
        Self {
            handle_id: self.handle_id,
            source_type: self.source_type.clone(),
            status: self.status,
            created_at: self.created_at,
            expires_at: self.expires_at,
            source_hash: self.source_hash.clone(),
            data: self.data.clone(),
            last_good: self.last_good.clone(),
            error: self.error.clone(),
            computed_by: self.computed_by.clone(),
            computation_duration: self.computation_duration,
            computation_count: self.computation_count,
            last_accessed: self.last_accessed,
            access_count: self.access_count,
        }
    }
}

impl<T> ProxyHandle<T> {
    /// Start a new computation instance, carrying lineage from `prior`
    pub(crate) fn computing(
        source_type: SourceType,
        handle_id: HandleId,
        computed_by: String,
        prior: Option<&ProxyHandle<T>>,
    ) -> Self {
        let now = Utc::now();
        let (computation_count, last_good) = match prior {
            Some(prior) => (
                prior.computation_count,
                prior.data.clone().or_else(|| prior.last_good.clone()),
            ),
            None => (0, None),
        };

        Self {
            handle_id,
            source_type,
            status: HandleStatus::Computing,
            created_at: now,
            expires_at: None,
            source_hash: None,
            data: None,
            last_good,
            error: None,
            computed_by,
            computation_duration: Duration::ZERO,
            computation_count,
            last_accessed: now,
            access_count: 0,
        }
    }

    /// COMPUTING -> FRESH
    pub(crate) fn complete(
        &mut self,
        value: T,
        duration: Duration,
        ttl: Option<Duration>,
        source_hash: Option<String>,
    ) {
        debug_assert!(self.status.can_transition_to(HandleStatus::Fresh));
        let now = Utc::now();
        self.status = HandleStatus::Fresh;
        self.data = Some(Arc::new(value));
        self.last_good = None;
        self.error = None;
        self.source_hash = source_hash;
        self.computation_duration = duration;
        self.computation_count += 1;
        self.expires_at = ttl
            .and_then(|ttl| TimeDelta::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));
    }

    /// COMPUTING -> ERROR. The last-known-good payload is kept.
    pub(crate) fn fail(&mut self, message: String, duration: Duration) {
        debug_assert!(self.status.can_transition_to(HandleStatus::Error));
        self.status = HandleStatus::Error;
        self.data = None;
        self.error = Some(message);
        self.computation_duration = duration;
    }

    /// FRESH -> STALE. Returns whether the transition happened.
    pub(crate) fn mark_stale(&mut self) -> bool {
        if self.status != HandleStatus::Fresh {
            return false;
        }
        self.status = HandleStatus::Stale;
        true
    }

    /// Flip a FRESH handle whose TTL has passed to STALE
    pub(crate) fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        self.is_expired_at(now) && self.mark_stale()
    }

    pub(crate) fn record_access(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.access_count += 1;
    }

    /// Identity of this computation instance
    pub fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    pub fn source_type(&self) -> &SourceType {
        &self.source_type
    }

    pub fn status(&self) -> HandleStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// TTL deadline; `None` means the handle never expires by time
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Fingerprint of the source data at computation time
    pub fn source_hash(&self) -> Option<&str> {
        self.source_hash.as_deref()
    }

    /// The payload, present only when FRESH or STALE
    pub fn data(&self) -> Option<&T> {
        self.data.as_deref()
    }

    /// Shared pointer to the payload
    pub fn data_arc(&self) -> Option<Arc<T>> {
        self.data.clone()
    }

    /// Payload of the previous successful computation, if this instance
    /// is COMPUTING or ERROR
    pub fn last_good(&self) -> Option<&T> {
        self.last_good.as_deref()
    }

    /// Current payload, or the last-known-good one for graceful degradation
    pub fn fallback_data(&self) -> Option<&T> {
        self.data().or_else(|| self.last_good())
    }

    /// Failure message, present only when ERROR
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Human-readable identity of the actor that triggered the computation
    pub fn computed_by(&self) -> &str {
        &self.computed_by
    }

    pub fn computation_duration(&self) -> Duration {
        self.computation_duration
    }

    /// Successful computations across this source type's lineage
    pub fn computation_count(&self) -> u64 {
        self.computation_count
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.last_accessed
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn is_fresh(&self) -> bool {
        self.status == HandleStatus::Fresh
    }

    pub fn is_stale(&self) -> bool {
        self.status == HandleStatus::Stale
    }

    pub fn is_error(&self) -> bool {
        self.status == HandleStatus::Error
    }

    /// Whether a FRESH handle's TTL has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == HandleStatus::Fresh && self.expires_at.is_some_and(|at| now > at)
    }
}
