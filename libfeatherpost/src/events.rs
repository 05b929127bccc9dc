//! Event system for pipeline state transitions
//!
//! An in-process event bus distributes audit events to subscribers without
//! blocking the worker. The bus uses `tokio::sync::broadcast`: if no
//! subscribers exist events are dropped immediately, and lagging subscribers
//! never block emitters. The sink is fire-and-forget; delivery failures are
//! ignored.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

/// Event bus for distributing pipeline events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with the specified per-subscriber capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers (non-blocking, never fails)
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Events emitted on every pipeline state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A scheduling tick started
    TickStarted { account_count: usize },

    /// A reservation's posting window had already passed
    ReservationExpired { account_id: String, slot_key: String },

    /// Pool content was assigned to a reservation
    ContentClaimed {
        account_id: String,
        slot_key: String,
        pool_id: String,
        /// true when the pool item was destructively consumed
        consumed: bool,
    },

    /// Media handles were obtained for a reservation
    MediaUploaded {
        account_id: String,
        slot_key: String,
        media_ids: Vec<String>,
    },

    /// The account's token pair was rotated
    TokenRefreshed { account_id: String },

    /// A post was published and recorded
    PostPublished {
        account_id: String,
        slot_key: String,
        post_id: String,
    },

    /// Another worker completed this reservation first
    PostAlreadyPublished { account_id: String, slot_key: String },

    /// A post attempt failed
    PostFailed {
        account_id: String,
        slot_key: String,
        error: String,
        permanent: bool,
    },
}
