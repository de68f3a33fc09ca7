//! Session view model
//!
//! One [`Session`] exists per wizard instance. It is owned by the session
//! controller; everything else sees it through [`SessionView`].

use crate::models::fields::FieldValues;
use crate::models::records::EntityKind;
use crate::schema::Step;
use crate::services::validation::FieldErrors;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitrep_common::EntityId;
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

/// Most recent advisories kept on the session
pub const MAX_ADVISORIES: usize = 20;

/// Auto-save indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutosaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
}

impl AutosaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutosaveStatus::Idle => "idle",
            AutosaveStatus::Saving => "saving",
            AutosaveStatus::Saved => "saved",
            AutosaveStatus::Error => "error",
        }
    }
}

/// Where the wizard currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "position", content = "step", rename_all = "snake_case")]
pub enum WizardPosition {
    Step(Step),
    Preview,
    /// Out in a Broadcaster/Program side flow; returns to step 1
    Diverted,
    /// Terminal
    Completed,
}

impl WizardPosition {
    pub fn step(&self) -> Option<Step> {
        match self {
            WizardPosition::Step(step) => Some(*step),
            _ => None,
        }
    }
}

impl fmt::Display for WizardPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WizardPosition::Step(step) => write!(f, "{}", step),
            WizardPosition::Preview => write!(f, "preview"),
            WizardPosition::Diverted => write!(f, "diverted"),
            WizardPosition::Completed => write!(f, "completed"),
        }
    }
}

/// Inspection lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionStatus {
    #[default]
    Draft,
    Completed,
}

/// Non-fatal problem reported to the inspector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    SaveFailed {
        message: String,
    },
    EntityCreationFailed {
        entity: EntityKind,
        name: String,
        message: String,
    },
    AssociationFailed {
        program: String,
        broadcaster: String,
        message: String,
    },
    LoadFailed {
        message: String,
    },
    BroadcasterSuggested {
        name: String,
    },
}

impl Advisory {
    /// One-line text for the inspector
    pub fn message(&self) -> String {
        match self {
            Advisory::SaveFailed { message } => message.clone(),
            Advisory::EntityCreationFailed { entity, name, .. } => {
                format!("Could not create {} \"{}\"; saved without it", entity, name)
            }
            Advisory::AssociationFailed {
                program,
                broadcaster,
                ..
            } => format!(
                "Broadcaster \"{}\" could not be linked to program \"{}\"",
                broadcaster, program
            ),
            Advisory::LoadFailed { message } => {
                format!("Could not load inspection: {}", message)
            }
            Advisory::BroadcasterSuggested { name } => {
                format!("Broadcaster \"{}\" suggested from program", name)
            }
        }
    }
}

/// Complete state of one wizard instance
#[derive(Debug, Clone)]
pub struct Session {
    /// Changes whenever a new wizard instance starts; stale task results are
    /// matched against it
    pub instance: Uuid,
    pub position: WizardPosition,
    pub inspection_id: Option<EntityId>,
    pub status: InspectionStatus,
    /// Values of the active step
    pub fields: FieldValues,
    /// Values of every step visited, carried across navigation
    pub carried: FieldValues,
    /// Read-only values from other steps used by derived fields
    pub derived_inputs: FieldValues,
    /// Active step was populated from the stored record
    pub hydrated: bool,
    pub dirty: bool,
    pub autosave_status: AutosaveStatus,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub validation_errors: FieldErrors,
    pub advisories: VecDeque<Advisory>,
}

impl Session {
    pub fn new(instance: Uuid) -> Self {
        Self {
            instance,
            position: WizardPosition::Step(Step::One),
            inspection_id: None,
            status: InspectionStatus::Draft,
            fields: FieldValues::new(),
            carried: FieldValues::new(),
            derived_inputs: FieldValues::new(),
            hydrated: false,
            dirty: false,
            autosave_status: AutosaveStatus::Idle,
            last_saved_at: None,
            validation_errors: FieldErrors::new(),
            advisories: VecDeque::new(),
        }
    }

    /// Active step, or `None` outside the four steps
    pub fn step(&self) -> Option<Step> {
        self.position.step()
    }

    pub fn push_advisory(&mut self, advisory: Advisory) {
        if self.advisories.len() == MAX_ADVISORIES {
            self.advisories.pop_front();
        }
        self.advisories.push_back(advisory);
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            instance: self.instance,
            position: self.position.to_string(),
            step: self.step().map(|s| s.number()),
            step_title: self.step().map(|s| s.title().to_string()),
            inspection_id: self.inspection_id.clone(),
            status: self.status,
            fields: self.fields.clone(),
            dirty: self.dirty,
            autosave_status: self.autosave_status,
            last_saved_at: self.last_saved_at,
            validation_errors: self.validation_errors.clone(),
            advisories: self.advisories.iter().cloned().collect(),
        }
    }
}

/// Read model handed to the surrounding UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionView {
    pub instance: Uuid,
    pub position: String,
    pub step: Option<u8>,
    pub step_title: Option<String>,
    pub inspection_id: Option<EntityId>,
    pub status: InspectionStatus,
    pub fields: FieldValues,
    pub dirty: bool,
    pub autosave_status: AutosaveStatus,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub validation_errors: FieldErrors,
    pub advisories: Vec<Advisory>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_at_step_one() {
        let session = Session::new(Uuid::new_v4());
        assert_eq!(session.step(), Some(Step::One));
        assert_eq!(session.autosave_status, AutosaveStatus::Idle);
        assert!(!session.dirty);
        assert!(session.inspection_id.is_none());
    }

    #[test]
    fn test_advisories_are_capped() {
        let mut session = Session::new(Uuid::new_v4());
        for i in 0..(MAX_ADVISORIES + 5) {
            session.push_advisory(Advisory::SaveFailed {
                message: format!("failure {}", i),
            });
        }
        assert_eq!(session.advisories.len(), MAX_ADVISORIES);
        assert_eq!(
            session.advisories.front(),
            Some(&Advisory::SaveFailed {
                message: "failure 5".to_string()
            })
        );
    }

    #[test]
    fn test_position_labels() {
        assert_eq!(WizardPosition::Step(Step::Three).to_string(), "step3");
        assert_eq!(WizardPosition::Preview.to_string(), "preview");
        assert_eq!(WizardPosition::Completed.to_string(), "completed");
    }

    #[test]
    fn test_advisory_serializes_with_kind_tag() {
        let advisory = Advisory::AssociationFailed {
            program: "News".to_string(),
            broadcaster: "CRTV".to_string(),
            message: "timeout".to_string(),
        };
        let json = serde_json::to_value(&advisory).unwrap();
        assert_eq!(json["kind"], "association_failed");
        assert!(advisory.message().contains("CRTV"));
    }
}
