//! Identifiers for source types and handle instances

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Caller-defined identifier for a class of computation (e.g. `codebase_topology`)
///
/// The engine never enumerates source types; it only uses them as map keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceType(String);

impl SourceType {
    /// Create a source type from any string-like value
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for SourceType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SourceType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&SourceType> for SourceType {
    fn from(value: &SourceType) -> Self {
        value.clone()
    }
}

impl Borrow<str> for SourceType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identity of one computation instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(Uuid);

impl HandleId {
    /// Generate a new random handle id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// First 8 hex characters, for compact display
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn source_type_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(SourceType::from("widgets"), 3);
        assert_eq!(map.get("widgets"), Some(&3));
    }

    #[test]
    fn source_type_serializes_as_string() {
        let json = serde_json::to_string(&SourceType::new("topology")).unwrap();
        assert_eq!(json, "\"topology\"");
    }

    #[test]
    fn handle_ids_are_unique() {
        let a = HandleId::new();
        let b = HandleId::new();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 8);
    }
}
