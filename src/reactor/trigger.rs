//! Invalidation triggers and reusable filters

use crate::config::schema::TriggerConfig;
use crate::handle::SourceType;
use crate::reactor::ChangeEvent;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type FilterFn = Arc<dyn Fn(&ChangeEvent) -> bool + Send + Sync>;

/// Maps a change topic to the source types it makes stale
#[derive(Clone)]
pub struct InvalidationTrigger {
    pub topic: String,
    pub source_types: Vec<SourceType>,
    filter: Option<FilterFn>,
}

impl InvalidationTrigger {
    /// Trigger that accepts every event on `topic`
    pub fn new<S>(topic: impl Into<String>, source_types: impl IntoIterator<Item = S>) -> Self
    where
        S: Into<SourceType>,
    {
        Self {
            topic: topic.into(),
            source_types: source_types.into_iter().map(Into::into).collect(),
            filter: None,
        }
    }

    /// Only react to events the predicate accepts
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ChangeEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Whether `event` should cause invalidation
    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        event.topic == self.topic && self.filter.as_ref().is_none_or(|filter| filter(event))
    }
}

impl fmt::Debug for InvalidationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationTrigger")
            .field("topic", &self.topic)
            .field("source_types", &self.source_types)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl From<&TriggerConfig> for InvalidationTrigger {
    fn from(config: &TriggerConfig) -> Self {
        let trigger = InvalidationTrigger::new(config.topic.clone(), config.source_types.clone());
        match &config.path_prefix {
            Some(prefix) => trigger.with_filter(TriggerFilter::path_prefix(prefix.clone())),
            None => trigger,
        }
    }
}

/// Common filter predicates over change payloads
pub struct TriggerFilter;

impl TriggerFilter {
    /// Accept events whose payload names a path under `prefix`
    ///
    /// Paths are read from a `paths` array or a single `path` string.
    /// Events naming no path are rejected.
    pub fn path_prefix(
        prefix: impl Into<PathBuf>,
    ) -> impl Fn(&ChangeEvent) -> bool + Send + Sync + 'static {
        let prefix = prefix.into();
        move |event: &ChangeEvent| {
            changed_paths(&event.payload)
                .iter()
                .any(|path| Path::new(path).starts_with(&prefix))
        }
    }
}

fn changed_paths(payload: &serde_json::Value) -> Vec<&str> {
    let mut paths: Vec<&str> = payload
        .get("paths")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    if let Some(path) = payload.get("path").and_then(|v| v.as_str()) {
        paths.push(path);
    }
    paths
}
