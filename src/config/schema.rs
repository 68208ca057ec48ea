//! Configuration schema for handlekeep
//!
//! Configuration is stored at `~/.config/handlekeep/config.toml`, with an
//! optional project-local `.handlekeep.toml` layered on top.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Defaults applied to compute calls made by the CLI
    pub compute: ComputeConfig,

    /// Directory scan settings
    pub scan: ScanConfig,

    /// Change-event triggers wired into the invalidation reactor
    pub triggers: Vec<TriggerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            compute: ComputeConfig::default(),
            scan: ScanConfig::default(),
            triggers: vec![TriggerConfig::default()],
        }
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append every lifecycle event to the event log
    pub event_log: bool,

    /// Event log location (defaults to the state directory)
    pub event_log_path: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
            event_log: false,
            event_log_path: None,
        }
    }
}

/// Compute defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Handle TTL in seconds (unset = never expires by time)
    pub ttl_secs: Option<u64>,

    /// Deadline for a computation in seconds (unset = no deadline)
    pub timeout_secs: Option<u64>,

    /// Label recorded as `computed_by` when none is given on the command line
    pub label: Option<String>,
}

impl ComputeConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Directory scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Source type under which scans are stored
    pub source_type: String,

    /// Descend into dot-directories and count dotfiles
    pub include_hidden: bool,

    /// Maximum directory depth (unset = unlimited)
    pub max_depth: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            source_type: "topology".to_string(),
            include_hidden: false,
            max_depth: None,
        }
    }
}

/// One invalidation trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Topic to subscribe to
    pub topic: String,

    /// Source types made stale by a matching event
    pub source_types: Vec<String>,

    /// Only react when a changed path lies under this prefix
    pub path_prefix: Option<PathBuf>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            topic: "source.changed".to_string(),
            source_types: vec!["topology".to_string()],
            path_prefix: None,
        }
    }
}
