//! JSON-lines log of lifecycle events
//!
//! Writes one line per event to `~/.local/state/handlekeep/events.log`
//! when `general.event_log` is enabled.

use crate::config::{schema::Config, ConfigManager};
use crate::events::{EventListener, LifecycleEvent};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// File-based event logger that appends JSON lines
pub struct EventLog {
    enabled: bool,
    path: PathBuf,
}

impl EventLog {
    /// Create an event logger from config
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.event_log,
            path: config
                .general
                .event_log_path
                .clone()
                .unwrap_or_else(ConfigManager::event_log_path),
        }
    }

    /// Create an enabled logger writing to `path`
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            enabled: true,
            path,
        }
    }

    /// Whether events will be written
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event as a JSON line
    ///
    /// IO failures are reported through tracing and otherwise dropped.
    pub async fn log(&self, event: &LifecycleEvent) {
        if !self.enabled {
            return;
        }

        let mut line = match serde_json::to_string(event) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize lifecycle event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write event log {}: {}", self.path.display(), e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EventListener for EventLog {
    async fn on_event(&self, event: &LifecycleEvent) {
        self.log(event).await;
    }
}
