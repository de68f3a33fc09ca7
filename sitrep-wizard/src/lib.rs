//! sitrep-wizard library interface
//!
//! The Inspection Session Engine: a four-step wizard that builds one
//! inspection record incrementally against a remote backing store, resolves
//! typed Broadcaster/Program names into records, and keeps in-progress work
//! across side flows. Exposed to a surrounding UI through a small HTTP API.

pub mod api;
pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod schema;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use services::SessionController;
use sitrep_common::events::EventBus;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// The wizard session driven by the UI
    pub controller: SessionController,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(controller: SessionController) -> Self {
        let event_bus = controller.events().clone();
        Self {
            controller,
            event_bus,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember `message` for `/health`
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::session_routes())
        .merge(api::erp_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
