//! Local database access

pub mod draft_slot;

pub use sitrep_common::db::{init_database, init_memory_database};
