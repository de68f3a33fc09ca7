//! Local SQLite state

pub mod init;

pub use init::*;
