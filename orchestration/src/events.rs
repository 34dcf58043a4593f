//! Event bus for steward observability
//!
//! Pub/sub over a Tokio broadcast channel. Delivery is synchronous with the
//! publishing call; listeners must not call back into the service that
//! emitted the event.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::health::{ActionRecord, HealthIssue, ScanReport};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Events the stewards publish
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrchestratorEvent {
    /// A health scan finished
    #[serde(rename = "check:completed")]
    CheckCompleted { report: ScanReport },

    /// A new health issue was opened
    #[serde(rename = "issue:detected")]
    IssueDetected { issue: HealthIssue },

    /// An active issue's condition cleared
    #[serde(rename = "issue:resolved")]
    IssueResolved { issue: HealthIssue },

    /// A corrective action ran
    #[serde(rename = "action:taken")]
    ActionTaken { action: ActionRecord },
}

impl OrchestratorEvent {
    /// Wire name of the event kind
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CheckCompleted { .. } => "check:completed",
            Self::IssueDetected { .. } => "issue:detected",
            Self::IssueResolved { .. } => "issue:resolved",
            Self::ActionTaken { .. } => "action:taken",
        }
    }
}

/// Broadcast bus with fire-and-forget publishing
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish to all subscribers; silently fine when nobody listens
    pub fn publish(&self, event: OrchestratorEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "event published"),
            Err(_) => debug!(event_type, "event published (no receivers)"),
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    /// Number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
