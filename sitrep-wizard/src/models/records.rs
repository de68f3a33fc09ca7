//! Records exchanged with the backing store

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sitrep_common::EntityId;
use std::fmt;

/// JSON object sent as a create/update body
pub type Payload = Map<String, Value>;

/// Inspection as returned by `GET/POST/PUT /inspections`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionRecord {
    pub id: EntityId,
    #[serde(default)]
    pub status: Option<String>,
    /// Every other attribute of the record
    #[serde(flatten)]
    pub fields: Payload,
}

impl InspectionRecord {
    /// Reference id stored under `key` (`program` or `broadcaster`)
    pub fn reference(&self, key: &str) -> Option<EntityId> {
        self.fields.get(key).and_then(EntityId::from_json)
    }

    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some("completed")
    }
}

/// Broadcaster reference entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcaster {
    pub id: EntityId,
    pub name: String,
    /// Contact and address attributes
    #[serde(flatten)]
    pub details: Payload,
}

/// Program reference entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Names of associated broadcasters, as listed by the store
    #[serde(default)]
    pub broadcaster_names: Vec<String>,
}

/// Kind of reference entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Broadcaster,
    Program,
}

impl EntityKind {
    /// Step-1 field holding the typed name
    pub fn name_field(&self) -> &'static str {
        match self {
            EntityKind::Broadcaster => "broadcaster_name",
            EntityKind::Program => "program_name",
        }
    }

    /// Inspection attribute holding the resolved identity
    pub fn reference_field(&self) -> &'static str {
        match self {
            EntityKind::Broadcaster => "broadcaster",
            EntityKind::Program => "program",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Broadcaster => write!(f, "broadcaster"),
            EntityKind::Program => write!(f, "program"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inspection_record_flattens_attributes() {
        let record: InspectionRecord = serde_json::from_value(json!({
            "id": 7,
            "status": "draft",
            "program": 3,
            "tower_type": "guyed",
        }))
        .unwrap();

        assert_eq!(record.id, EntityId::Numeric(7));
        assert_eq!(record.status.as_deref(), Some("draft"));
        assert_eq!(record.reference("program"), Some(EntityId::Numeric(3)));
        assert_eq!(record.reference("broadcaster"), None);
        assert_eq!(record.fields["tower_type"], json!("guyed"));
        assert!(!record.fields.contains_key("id"));
        assert!(!record.is_completed());
    }

    #[test]
    fn test_program_defaults() {
        let program: Program =
            serde_json::from_value(json!({ "id": "p-1", "name": "News" })).unwrap();
        assert!(program.broadcaster_names.is_empty());
        assert!(program.description.is_none());
    }

    #[test]
    fn test_broadcaster_keeps_details() {
        let broadcaster: Broadcaster = serde_json::from_value(json!({
            "id": 1,
            "name": "CRTV",
            "town": "Yaoundé",
            "contact_email": "info@crtv.example",
        }))
        .unwrap();
        assert_eq!(broadcaster.details["town"], json!("Yaoundé"));
    }
}
