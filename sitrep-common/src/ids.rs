//! Identity helpers
//!
//! The backing store hands out identities as JSON numbers on some deployments
//! and strings on others. [`EntityId`] accepts both and renders them back the
//! same way, so a value read from the store round-trips unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity assigned by the backing store to an inspection, broadcaster or program
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Numeric(i64),
    Text(String),
}

impl EntityId {
    /// Path segment form, e.g. `/inspections/{id}`
    pub fn as_path_segment(&self) -> String {
        self.to_string()
    }

    /// Parse an identity typed by a user or taken from a URL
    ///
    /// Purely numeric input becomes [`EntityId::Numeric`]; blank input is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(match trimmed.parse::<i64>() {
            Ok(n) => EntityId::Numeric(n),
            Err(_) => EntityId::Text(trimmed.to_string()),
        })
    }

    /// JSON form for request bodies
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            EntityId::Numeric(n) => serde_json::Value::from(*n),
            EntityId::Text(s) => serde_json::Value::from(s.clone()),
        }
    }

    /// Read an identity out of a JSON value (number or non-empty string)
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(EntityId::Numeric),
            serde_json::Value::String(s) => EntityId::parse(s),
            _ => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Numeric(n) => write!(f, "{}", n),
            EntityId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        EntityId::Numeric(n)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId::Text(s.to_string())
    }
}

/// Fresh token identifying one wizard session instance
pub fn new_instance_token() -> Uuid {
    Uuid::new_v4()
}
