//! Typed change notifications emitted by a conversation.
//!
//! The UI layer observes a conversation through a broadcast subscription;
//! nothing in the core depends on who is listening, and a full channel only
//! drops events for the lagging subscriber.

use serde::Serialize;
use tokio::sync::broadcast;

use velours_shared::constants::EVENT_CHANNEL_CAPACITY;
use velours_shared::{MessageId, ReadPosition};

/// Why a `Changed` notification fired.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ChangeReason {
    MessageAdded,
    MessageRemoved,
    ReadPosition,
    UnreadCount,
    DeliveryState,
    Summary,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum ConversationEvent {
    /// Generic "something changed" notification with a reason.
    Changed { reason: ChangeReason },
    /// A batch of read positions entered the in-memory cache.
    ReadPositionsAdded(Vec<ReadPosition>),
    /// A message settled into a terminal delivery state.
    DeliverySettled { message_id: MessageId, failed: bool },
}

/// Broadcast sender wrapper; cheap to clone, send never blocks.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<ConversationEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event.  No subscribers is not an error.
    pub fn emit(&self, event: ConversationEvent) {
        let _ = self.tx.send(event);
    }

    pub fn changed(&self, reason: ChangeReason) {
        self.emit(ConversationEvent::Changed { reason });
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
