//! Server-Sent Events stream of session events

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events
///
/// Streams `StepChanged`, `AutosaveStatusChanged`, `InspectionCreated`,
/// `InspectionCompleted` and `Advisory` events.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sitrep_common::sse::event_stream_from_bus("sitrep-wizard", state.event_bus.clone())
}
