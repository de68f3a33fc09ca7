//! Error type for local concerns shared by the sitrep crates
//!
//! Covers the draft database, files and configuration. Backing store
//! failures have their own type in `sitrep-wizard`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Local SQLite failure (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Draft snapshot could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file or client setup rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local database stayed locked past the retry budget
    #[error("Database busy: {operation} gave up after {attempts} attempts ({elapsed_ms} ms)")]
    Busy {
        operation: String,
        attempts: u32,
        elapsed_ms: u64,
    },
}
