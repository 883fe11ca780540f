// Internal event bus for document lifecycle notifications.
//
// Publishers never wait on subscribers; a bus with no subscribers drops
// events silently.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocEvent {
    /// Pending content for a document was persisted.
    Saved { document_id: String, user_id: String, saved_at: DateTime<Utc> },
    /// A persistence attempt failed; the content stays pending.
    SaveFailed { document_id: String, error: String },
}

impl DocEvent {
    pub fn document_id(&self) -> &str {
        match self {
            Self::Saved { document_id, .. } | Self::SaveFailed { document_id, .. } => document_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DocEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: DocEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
