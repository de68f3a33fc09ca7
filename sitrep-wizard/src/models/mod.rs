//! Data models for the inspection wizard

pub mod fields;
pub mod records;
pub mod session;

pub use fields::{FieldValue, FieldValues};
pub use records::{Broadcaster, EntityKind, InspectionRecord, Payload, Program};
pub use session::{Advisory, AutosaveStatus, Session, SessionView, WizardPosition};
