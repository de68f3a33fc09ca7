//! Wizard session endpoints
//!
//! The surrounding UI renders [`SessionView`] and drives the wizard only
//! through these routes.

use crate::models::fields::FieldValue;
use crate::models::records::EntityKind;
use crate::models::session::SessionView;
use crate::services::draft_continuity::{SideExit, SideReturn};
use crate::services::session_controller::{AdvanceOutcome, SaveOutcome};
use crate::services::validation::FieldErrors;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sitrep_common::EntityId;
use tracing::{info, warn};

/// Body of `POST /session/start`
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub inspection_id: Option<EntityId>,
}

/// Body of `PUT /session/fields/:name`
#[derive(Debug, Deserialize)]
pub struct FieldChangeRequest {
    pub value: FieldValue,
}

/// Body of `POST /session/divert`
#[derive(Debug, Deserialize)]
pub struct DivertRequest {
    pub kind: EntityKind,
    #[serde(default)]
    pub prefill_name: Option<String>,
}

/// Result of `POST /session/save`
#[derive(Debug, Serialize)]
pub struct SaveResponse {
    /// "saved" | "skipped" | "failed" | "stale"
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspection_id: Option<EntityId>,
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub session: SessionView,
}

/// Result of `advance` / `preview`
#[derive(Debug, Serialize)]
pub struct NavigationResponse {
    /// "moved" | "blocked" | "not_completed"
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub session: SessionView,
}

/// GET /session
pub async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.controller.view().await)
}

/// POST /session/start
///
/// **Request:** `{"inspection_id": 42}` or `{}` for a new inspection
pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> ApiResult<Json<SessionView>> {
    info!(inspection_id = ?request.inspection_id, "Start session requested");
    Ok(Json(state.controller.start(request.inspection_id).await?))
}

/// PUT /session/fields/:name
///
/// **Request:** `{"value": "text"}` or `{"value": true}`
pub async fn change_field(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<FieldChangeRequest>,
) -> ApiResult<Json<SessionView>> {
    Ok(Json(
        state.controller.on_field_change(&name, request.value).await?,
    ))
}

/// POST /session/save
pub async fn save_session(State(state): State<AppState>) -> ApiResult<Json<SaveResponse>> {
    let outcome = state.controller.save_now().await?;
    if let SaveOutcome::Failed(e) = &outcome {
        state.record_error(e.to_string()).await;
    }

    let (inspection_id, created, error) = match &outcome {
        SaveOutcome::Saved {
            inspection_id,
            created,
        } => (Some(inspection_id.clone()), *created, None),
        SaveOutcome::Failed(e) => (None, false, Some(e.user_message())),
        SaveOutcome::Skipped | SaveOutcome::Pending | SaveOutcome::Stale => (None, false, None),
    };

    Ok(Json(SaveResponse {
        result: outcome.label(),
        inspection_id,
        created,
        error,
        session: state.controller.view().await,
    }))
}

async fn navigation_response(state: &AppState, outcome: AdvanceOutcome) -> NavigationResponse {
    let session = state.controller.view().await;
    match outcome {
        AdvanceOutcome::Moved { from, to, save } => {
            if let SaveOutcome::Failed(e) = &save {
                warn!("Navigated with failed save: {}", e);
                state.record_error(e.to_string()).await;
            }
            NavigationResponse {
                result: "moved",
                from: Some(from.to_string()),
                to: Some(to.to_string()),
                save: Some(save.label()),
                errors: None,
                message: None,
                session,
            }
        }
        AdvanceOutcome::Blocked { errors } => NavigationResponse {
            result: "blocked",
            from: None,
            to: None,
            save: None,
            errors: Some(errors),
            message: None,
            session,
        },
        AdvanceOutcome::NotCompleted { message } => {
            state.record_error(message.clone()).await;
            NavigationResponse {
                result: "not_completed",
                from: None,
                to: None,
                save: None,
                errors: None,
                message: Some(message),
                session,
            }
        }
    }
}

/// POST /session/advance
pub async fn advance(State(state): State<AppState>) -> ApiResult<Json<NavigationResponse>> {
    let outcome = state.controller.advance().await?;
    Ok(Json(navigation_response(&state, outcome).await))
}

/// POST /session/preview
pub async fn preview(State(state): State<AppState>) -> ApiResult<Json<NavigationResponse>> {
    let outcome = state.controller.preview().await?;
    Ok(Json(navigation_response(&state, outcome).await))
}

/// POST /session/retreat
pub async fn retreat(State(state): State<AppState>) -> ApiResult<Json<SessionView>> {
    Ok(Json(state.controller.retreat().await?))
}

/// POST /session/divert
///
/// **Request:** `{"kind": "broadcaster", "prefill_name": "CRTV"}`
pub async fn divert(
    State(state): State<AppState>,
    Json(request): Json<DivertRequest>,
) -> ApiResult<Json<SideExit>> {
    Ok(Json(
        state
            .controller
            .divert(request.kind, request.prefill_name)
            .await?,
    ))
}

/// POST /session/return
///
/// **Request:** `{"created": {"kind": "broadcaster", "name": "CRTV"}, "restore_draft": true}`
pub async fn return_from_side_flow(
    State(state): State<AppState>,
    Json(signal): Json<SideReturn>,
) -> ApiResult<Json<SessionView>> {
    Ok(Json(state.controller.return_from_side_flow(signal).await?))
}

/// Build session routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/session", get(get_session))
        .route("/session/start", post(start_session))
        .route("/session/fields/:name", put(change_field))
        .route("/session/save", post(save_session))
        .route("/session/advance", post(advance))
        .route("/session/retreat", post(retreat))
        .route("/session/preview", post(preview))
        .route("/session/divert", post(divert))
        .route("/session/return", post(return_from_side_flow))
}
