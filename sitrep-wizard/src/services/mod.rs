//! Inspection Session Engine services

pub mod debounce;
pub mod draft_continuity;
pub mod entity_resolver;
pub mod entity_store;
pub mod erp;
pub mod partitioner;
pub mod session_controller;
pub mod validation;

pub use draft_continuity::{DraftContinuity, SideExit, SideReturn};
pub use entity_resolver::EntityResolver;
pub use entity_store::{EntityStore, SharedEntityStore};
pub use session_controller::{
    AdvanceOutcome, EngineServices, SaveOutcome, SessionController, SessionError,
};
