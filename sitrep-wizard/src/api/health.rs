//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use sitrep_common::EntityId;
use tracing::warn;

use crate::models::session::AutosaveStatus;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" while the latest save is failing
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub uptime_seconds: u64,
    /// Wizard position of the active session ("step2", "preview", ...)
    pub position: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspection_id: Option<EntityId>,
    pub autosave_status: &'static str,
    /// A stashed step-1 draft is waiting for a side-flow return
    pub draft_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64;
    let session = state.controller.view().await;

    let draft_pending = match state.controller.services().drafts.has_draft().await {
        Ok(pending) => pending,
        Err(e) => {
            warn!("Could not read draft slot: {}", e);
            false
        }
    };

    let status = match session.autosave_status {
        AutosaveStatus::Error => "degraded",
        _ => "ok",
    };

    Json(HealthResponse {
        status,
        module: "sitrep-wizard",
        version: env!("CARGO_PKG_VERSION"),
        git_hash: env!("GIT_HASH"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        uptime_seconds,
        position: session.position,
        inspection_id: session.inspection_id,
        autosave_status: session.autosave_status.as_str(),
        draft_pending,
        last_error: state.last_error.read().await.clone(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
