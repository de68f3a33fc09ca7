//! Server-Sent Events (SSE) utilities

use crate::events::EventBus;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Interval between keep-alive comments
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Stream every event on `bus` to an SSE client
///
/// Sends a `ConnectionStatus` event first, then one SSE event per
/// [`crate::events::SessionEvent`] named after its type with the JSON body as
/// data. A lagging client skips the events it missed and keeps streaming.
pub fn event_stream_from_bus(
    service_name: &'static str,
    bus: EventBus,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} session events", service_name);
    let mut rx = bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let name = event.event_type().to_string();
                    match serde_json::to_string(&event) {
                        Ok(data) => {
                            debug!(event = %name, "SSE: forwarding event");
                            yield Ok(Event::default().event(name).data(data));
                        }
                        Err(e) => warn!("SSE: failed to serialize {}: {}", name, e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE: client lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => {
                    info!("SSE: {} event bus closed", service_name);
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
