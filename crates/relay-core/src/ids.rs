//! Connection identifiers.
//!
//! Every accepted socket gets a `ConnectionId` of the form `conn_<uuid-v7>`.
//! The v7 prefix keeps IDs roughly ordered by accept time, which makes log
//! lines for a single relay session easy to follow.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one accepted peer connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a fresh ID.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Wrap an existing string (tests, log correlation).
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"));
        assert_eq!(id.to_string(), id.as_str());
    }

    #[test]
    fn from_string_preserves_value() {
        let id = ConnectionId::from_string("conn_fixed");
        assert_eq!(id.as_str(), "conn_fixed");
    }

    #[test]
    fn serializes_transparently() {
        let id = ConnectionId::from_string("conn_x");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"conn_x\"");
    }
}
