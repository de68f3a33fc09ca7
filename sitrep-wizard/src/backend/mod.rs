//! Backing store access
//!
//! The inspection record and the Broadcaster/Program reference entities live
//! in a remote REST store. [`BackingStore`] is the seam between the session
//! engine and that store: [`http::HttpBackingStore`] talks to the real
//! service, [`memory::MemoryBackingStore`] keeps everything in process.

pub mod http;
pub mod memory;

use crate::models::records::{Broadcaster, InspectionRecord, Payload, Program};
use crate::services::validation::FieldErrors;
use async_trait::async_trait;
use sitrep_common::EntityId;
use thiserror::Error;

/// Backing store call failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// Connectivity problem or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// Store rejected the payload (HTTP 400)
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    /// Identity unknown to the store (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-success status
    #[error("Backing store returned {status}: {body}")]
    Unexpected { status: u16, body: String },

    /// Response body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),
}

impl StoreError {
    /// Failures that the next auto-save cycle may recover from
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Network(_) | StoreError::Unexpected { .. } | StoreError::Parse(_)
        )
    }

    /// Field-level messages carried by a validation failure
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            StoreError::Validation(errors) => Some(errors),
            _ => None,
        }
    }

    /// Message shown to the inspector
    pub fn user_message(&self) -> String {
        match self {
            StoreError::Network(_) => {
                "Network error - data will be saved when connection is restored".to_string()
            }
            StoreError::Validation(errors) => format!("Validation error: {}", errors),
            StoreError::NotFound(_) => {
                "Inspection not found - please refresh and try again".to_string()
            }
            StoreError::Unexpected { .. } | StoreError::Parse(_) => {
                "Save failed - data will be retried automatically".to_string()
            }
        }
    }
}

/// Operations the session engine needs from the backing store
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// `GET /inspections/{id}`
    async fn get_inspection(&self, id: &EntityId) -> Result<InspectionRecord, StoreError>;

    /// `POST /inspections`
    async fn create_inspection(&self, payload: &Payload) -> Result<InspectionRecord, StoreError>;

    /// `PUT /inspections/{id}` with partial "set" semantics
    async fn update_inspection(
        &self,
        id: &EntityId,
        payload: &Payload,
    ) -> Result<InspectionRecord, StoreError>;

    /// `GET /broadcasters`
    async fn list_broadcasters(&self) -> Result<Vec<Broadcaster>, StoreError>;

    /// `POST /broadcasters`
    async fn create_broadcaster(&self, attributes: &Payload) -> Result<Broadcaster, StoreError>;

    /// `GET /programs`
    async fn list_programs(&self) -> Result<Vec<Program>, StoreError>;

    /// `POST /programs`
    async fn create_program(&self, attributes: &Payload) -> Result<Program, StoreError>;

    /// `POST /programs/{id}/add-broadcaster` (idempotent)
    async fn add_broadcaster_to_program(
        &self,
        program: &EntityId,
        broadcaster: &EntityId,
    ) -> Result<(), StoreError>;

    /// `POST /programs/{id}/remove-broadcaster` (idempotent)
    async fn remove_broadcaster_from_program(
        &self,
        program: &EntityId,
        broadcaster: &EntityId,
    ) -> Result<(), StoreError>;
}
