//! # SITREP Common Library
//!
//! Shared code for the sitrep inspection tools:
//! - Error type and result alias
//! - Configuration loading (TOML + environment + compiled defaults)
//! - Session event types and the broadcast EventBus
//! - Local SQLite state initialisation
//! - Clocks and timestamp helpers
//! - Backing-store identity helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod ids;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
pub use ids::EntityId;
