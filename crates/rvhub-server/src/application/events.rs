//! Typed event stream published by the coordinator.
//!
//! Subscribers (a dashboard process, tests) observe the protocol flow and
//! disconnects without being able to block the session readers: events go
//! through a `tokio::sync::broadcast` channel, so a slow subscriber lags and
//! drops old events instead of applying backpressure to protocol processing.

use serde_json::Value;
use tokio::sync::broadcast;

/// Default capacity of the broadcast channel backing the event stream.
///
/// A subscriber that falls more than this many events behind starts losing
/// the oldest ones (`RecvError::Lagged`).
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events observable from outside the coordinator.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// One frame arrived on a session and parsed as a JSON object with a
    /// `type` field. Published before any registry mutation the frame causes,
    /// so subscribers see the raw protocol flow in order.
    MessageReceived {
        frame_type: String,
        message: Value,
    },
    /// A bound session ended, for whatever reason. Fired exactly once per
    /// bound session, after its record is removed and its socket closed.
    DeviceDisconnected { target_id: String },
}

/// Cloneable handle for publishing and subscribing to coordinator events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoordinatorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event to all current subscribers.
    ///
    /// Having no subscribers is normal (the send error is discarded); the
    /// coordinator must not depend on anyone listening.
    pub fn publish(&self, event: CoordinatorEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
