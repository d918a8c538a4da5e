//! The message record as seen by the read-state and delivery core.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer or persisted as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    AccountId, ConversationId, DeviceId, MessageId, MessageKind, MessageMode, ServerTimestamp,
};

/// Delivery state of an outgoing message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SendState {
    Sending,
    Sent,
    Failed,
}

impl SendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// Transport unavailable or the request itself failed.
    Network,
    /// The recipient's identity key no longer matches our session.
    IdentityKeyMismatch,
    /// Wire payload construction failed before anything was sent.
    Payload,
}

/// A per-recipient delivery failure attached to a message.
///
/// Attached instead of thrown: the message stays locally visible in an error
/// state and a higher layer may retry it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryError {
    pub recipient: AccountId,
    pub kind: DeliveryErrorKind,
    pub detail: String,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Locally generated unique identifier.
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// Message author.  `None` for local notices, which have no sender and
    /// must never receive read receipts.
    pub sender: Option<AccountId>,
    /// Device the message originated from.
    pub source_device: DeviceId,
    pub kind: MessageKind,
    pub body: String,
    /// Client-set send time (milliseconds).  Display and receipt-reference
    /// only; never used for ordering.
    pub sent_at: i64,
    /// Server-assigned ordering key.  Zero until the server has confirmed
    /// the message.
    pub server_timestamp: ServerTimestamp,
    /// Notification dedup counter assigned by the server, if any.
    pub notify_sequence_id: Option<u64>,
    /// Thread this message belongs to (topic replies and quote replies).
    pub thread_id: Option<MessageId>,
    /// Disappearing-message timer in seconds, if set.
    pub expires_in: Option<u32>,
    pub mode: MessageMode,
    /// For recall messages, the message being recalled.
    pub recall_of: Option<MessageId>,
    /// Auto-translation target.  Always `None` on outgoing messages.
    pub translate_lang: Option<String>,
    /// `None` for incoming and local messages.
    pub send_state: Option<SendState>,
    pub delivery_errors: Vec<DeliveryError>,
    /// Whether the message mentions the local account.
    pub mentions_self: bool,
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// True when delivery has already failed for at least one recipient.
    pub fn has_delivery_errors(&self) -> bool {
        !self.delivery_errors.is_empty()
    }

    /// Dedup key grouping related outgoing variants of one message: a
    /// recall collapses onto the message it recalls.
    pub fn collapse_id(&self) -> MessageId {
        self.recall_of.unwrap_or(self.id)
    }

    /// True for messages that count towards the unread total: incoming
    /// messages authored by somebody else.
    pub fn counts_as_unread(&self, local: &AccountId) -> bool {
        self.kind == MessageKind::Incoming && self.sender.as_ref() != Some(local)
    }
}
