//! Session event types and EventBus
//!
//! Events describe what a wizard session did (navigation, saves, advisories)
//! and are broadcast to any attached observer, such as the SSE endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted by an inspection wizard session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Wizard position changed (step, preview or completed)
    StepChanged {
        instance: Uuid,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// Auto-save indicator changed
    AutosaveStatusChanged {
        instance: Uuid,
        /// "idle" | "saving" | "saved" | "error"
        status: String,
        last_saved_at: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    /// First successful save created the inspection record
    InspectionCreated {
        instance: Uuid,
        inspection_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Inspection marked completed on the backing store
    InspectionCompleted {
        instance: Uuid,
        inspection_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Non-fatal problem the inspector should know about
    Advisory {
        instance: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Event type name used as the SSE event field
    pub fn event_type(&self) -> &str {
        match self {
            SessionEvent::StepChanged { .. } => "StepChanged",
            SessionEvent::AutosaveStatusChanged { .. } => "AutosaveStatusChanged",
            SessionEvent::InspectionCreated { .. } => "InspectionCreated",
            SessionEvent::InspectionCompleted { .. } => "InspectionCompleted",
            SessionEvent::Advisory { .. } => "Advisory",
        }
    }

    /// Session instance the event belongs to
    pub fn instance(&self) -> Uuid {
        match self {
            SessionEvent::StepChanged { instance, .. }
            | SessionEvent::AutosaveStatusChanged { instance, .. }
            | SessionEvent::InspectionCreated { instance, .. }
            | SessionEvent::InspectionCompleted { instance, .. }
            | SessionEvent::Advisory { instance, .. } => *instance,
        }
    }
}

/// Broadcast channel for [`SessionEvent`]s
///
/// Cloning is cheap; all clones share the same channel.
///
/// # Examples
///
/// ```
/// use sitrep_common::events::{EventBus, SessionEvent};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(SessionEvent::Advisory {
///     instance: uuid::Uuid::new_v4(),
///     message: "Broadcaster could not be linked to program".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SessionEvent,
    ) -> Result<usize, broadcast::error::SendError<SessionEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
