//! CLI command implementations

pub mod config;
pub mod scan;
pub mod simulate;

pub use config::execute as config;
pub use scan::execute as scan;
pub use simulate::execute as simulate;

use crate::config::Config;
use crate::error::{HandleError, HandleResult};
use crate::events::EventLog;
use crate::handle::{HandleStatus, ProxyHandle};
use crate::store::HandleStore;
use crate::topology::Topology;
use chrono::{DateTime, Utc};
use console::{style, StyledObject};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const DEFAULT_LABEL: &str = "handlekeep-cli";

/// Serializable view of a topology handle's metadata
#[derive(Debug, Serialize)]
pub struct HandleView {
    pub source_type: String,
    pub handle_id: String,
    pub status: HandleStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub source_hash: Option<String>,
    pub computed_by: String,
    pub computation_ms: u128,
    pub computation_count: u64,
    pub access_count: u64,
    pub error: Option<String>,
}

impl From<&ProxyHandle<Topology>> for HandleView {
    fn from(handle: &ProxyHandle<Topology>) -> Self {
        Self {
            source_type: handle.source_type().to_string(),
            handle_id: handle.handle_id().to_string(),
            status: handle.status(),
            created_at: handle.created_at(),
            expires_at: handle.expires_at(),
            source_hash: handle.source_hash().map(str::to_string),
            computed_by: handle.computed_by().to_string(),
            computation_ms: handle.computation_duration().as_millis(),
            computation_count: handle.computation_count(),
            access_count: handle.access_count(),
            error: handle.error().map(str::to_string),
        }
    }
}

/// Run `body` against a fresh topology store
///
/// When the event log is enabled every lifecycle event is appended to it,
/// and the log is drained before this returns.
pub(crate) async fn with_topology_store<F, Fut>(config: &Config, body: F) -> HandleResult<()>
where
    F: FnOnce(HandleStore<Topology>) -> Fut,
    Fut: Future<Output = HandleResult<()>>,
{
    let store = HandleStore::new();
    let log = EventLog::new(config);
    let writer = log.is_enabled().then(|| {
        debug!("Logging lifecycle events to {}", log.path().display());
        let (subscription, mut receiver) = store.subscribe_channel();
        let task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                log.log(&event).await;
            }
        });
        (subscription, task)
    });

    let result = body(store).await;

    if let Some((subscription, task)) = writer {
        subscription.unsubscribe();
        if let Err(e) = task.await {
            warn!("Event log writer ended abnormally: {}", e);
        }
    }
    result
}

/// Resolve an optional directory argument against the working directory
pub(crate) fn resolve_root(path: Option<&Path>) -> HandleResult<PathBuf> {
    let root = match path {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()
            .map_err(|e| HandleError::io("getting current directory", e))?,
    };
    if !root.is_dir() {
        return Err(HandleError::PathNotFound(root));
    }
    Ok(root)
}

pub(crate) fn compute_label(arg: Option<String>, config: &Config) -> String {
    arg.or_else(|| config.compute.label.clone())
        .unwrap_or_else(|| DEFAULT_LABEL.to_string())
}

pub(crate) fn styled_status(status: HandleStatus) -> StyledObject<String> {
    let text = status.to_string();
    match status {
        HandleStatus::Fresh => style(text).green(),
        HandleStatus::Stale => style(text).yellow(),
        HandleStatus::Error => style(text).red(),
        HandleStatus::Computing => style(text).cyan(),
        HandleStatus::Empty => style(text).dim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ComputeOptions;
    use tempfile::TempDir;

    #[test]
    fn label_precedence() {
        let mut config = Config::default();
        assert_eq!(compute_label(None, &config), DEFAULT_LABEL);

        config.compute.label = Some("nightly".to_string());
        assert_eq!(compute_label(None, &config), "nightly");
        assert_eq!(compute_label(Some("manual".to_string()), &config), "manual");
    }

    #[test]
    fn resolve_root_rejects_missing_directory() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing");
        assert!(matches!(
            resolve_root(Some(&missing)),
            Err(HandleError::PathNotFound(_))
        ));
        assert_eq!(resolve_root(Some(temp.path())).unwrap(), temp.path());
    }

    #[tokio::test]
    async fn event_log_receives_every_event() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("events.log");
        let mut config = Config::default();
        config.general.event_log = true;
        config.general.event_log_path = Some(log_path.clone());

        with_topology_store(&config, |store| async move {
            store
                .compute(
                    "topology",
                    || async { Ok::<_, String>(empty_topology()) },
                    ComputeOptions::new("test"),
                )
                .await?;
            store.invalidate("topology");
            Ok(())
        })
        .await
        .unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        let kinds: Vec<String> = content
            .lines()
            .map(|line| {
                let event: serde_json::Value = serde_json::from_str(line).unwrap();
                event["event_type"].to_string()
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "\"computation_started\"",
                "\"computation_completed\"",
                "\"handle_invalidated\"",
                "\"handle_stale\"",
            ]
        );
    }

    fn empty_topology() -> Topology {
        Topology {
            root: PathBuf::from("."),
            files: 0,
            directories: 0,
            total_bytes: 0,
            extensions: Default::default(),
            entries: Vec::new(),
        }
    }
}
