//! Real-time event plumbing for mechanics and dashboards
//!
//! ## Protocol
//!
//! Connect: `ws://localhost:8080/ws`
//!
//! Messages (server → client):
//! - `identified` - Identification accepted, presence registered
//! - `provider_online` / `provider_offline` - Presence changes
//! - `request_new` - A nearby request needs a mechanic
//! - `request_update` - A request changed lifecycle state
//! - `pong` - Reply to a client ping
//! - `error` - Something the client sent was rejected
//!
//! Messages (client → server):
//! - `identify` - Present a mechanic token to go online
//! - `ping` - Keep-alive ping
//!
//! ## Example Messages
//!
//! ```json
//! // Server offers a request to an online mechanic
//! {
//!   "type": "request_new",
//!   "request_id": "9be0f4a7-...",
//!   "service_type": "tire-repair",
//!   "description": "flat rear tire",
//!   "latitude": 19.0760,
//!   "longitude": 72.8777,
//!   "distance_km": 1.5,
//!   "timestamp": "2025-01-15T10:30:00Z"
//! }
//!
//! // Server announces a state change
//! {
//!   "type": "request_update",
//!   "request_id": "9be0f4a7-...",
//!   "status": "accepted",
//!   "accepted_by": "prov-42",
//!   "timestamp": "2025-01-15T10:30:00Z"
//! }
//! ```

pub mod events;

pub use events::{ClientEvent, LiveEvent};

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

// ============================================================================
// Channel Handle
// ============================================================================

/// Targeted send half of one live connection.
///
/// The connection task owns the receiver and drains events into the socket,
/// so dispatch never touches the socket directly.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    channel_id: Uuid,
    tx: mpsc::UnboundedSender<LiveEvent>,
}

impl ChannelHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            channel_id: Uuid::new_v4(),
            tx,
        };
        (handle, rx)
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    /// Queue an event for this connection. Returns false once the
    /// connection task has dropped its receiver.
    pub fn push(&self, event: LiveEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

// ============================================================================
// Live Hub
// ============================================================================

/// Hub for broadcasting lifecycle events to all connected clients
pub struct LiveHub {
    sender: broadcast::Sender<LiveEvent>,
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Subscribe to broadcast events
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.sender.subscribe()
    }

    /// Broadcast an event to all connected clients
    pub fn broadcast(&self, event: LiveEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}
