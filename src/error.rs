//! Error types for handlekeep
//!
//! All modules use `HandleResult<T>` as their return type.

use crate::handle::{HandleId, SourceType};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for handlekeep operations
pub type HandleResult<T> = Result<T, HandleError>;

/// All errors that can occur in handlekeep
#[derive(Error, Debug)]
pub enum HandleError {
    // Handle lifecycle errors
    #[error("No proxy handle for source type: {0}")]
    NoProxyHandle(SourceType),

    #[error("Computation failed for {source_type} (handle {handle_id}): {message}")]
    Computation {
        source_type: SourceType,
        handle_id: HandleId,
        message: String,
    },

    #[error("Computation timed out for {source_type} after {elapsed:?}")]
    Timeout {
        source_type: SourceType,
        handle_id: Option<HandleId>,
        elapsed: Duration,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Reactor errors
    #[error("Change transport error on topic {topic}: {reason}")]
    Transport { topic: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandleError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an invalid argument error
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    /// True for failures produced by a computation (including timeouts)
    pub fn is_computation_failure(&self) -> bool {
        matches!(self, Self::Computation { .. } | Self::Timeout { .. })
    }

    /// Check if a fresh explicit `compute` call may succeed where this failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoProxyHandle(_) | Self::Computation { .. } | Self::Timeout { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoProxyHandle(_) => Some("Run an explicit compute for this source type first"),
            Self::Timeout { .. } => Some("Retry with a larger --timeout"),
            Self::ConfigInvalid { .. } => Some("Run: handlekeep config init --force"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = HandleError::NoProxyHandle(SourceType::from("widgets"));
        assert!(err.to_string().contains("No proxy handle"));
        assert!(err.to_string().contains("widgets"));
    }

    #[test]
    fn error_hint() {
        let err = HandleError::NoProxyHandle(SourceType::from("widgets"));
        assert_eq!(
            err.hint(),
            Some("Run an explicit compute for this source type first")
        );
        assert_eq!(HandleError::invalid("x").hint(), None);
    }

    #[test]
    fn error_retryable() {
        let timeout = HandleError::Timeout {
            source_type: SourceType::from("scan"),
            handle_id: None,
            elapsed: Duration::from_millis(5),
        };
        assert!(timeout.is_retryable());
        assert!(timeout.is_computation_failure());
        assert!(!HandleError::invalid("empty label").is_retryable());
    }
}
