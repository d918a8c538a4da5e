use serde::{Deserialize, Serialize};
use uuid::Uuid;

use velours_shared::{AccountId, ConversationId, MessageId, MessageMode, ReadPosition};

/// Wire payload for one outgoing message, one variant per destination kind.
///
/// Construction is owned by the [`Messaging`](crate::Messaging)
/// implementation; the core only decides which variant applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessagePayload {
    /// One-to-one delivery.
    ToContact {
        recipient: AccountId,
        content: PayloadContent,
    },
    /// Group delivery.
    ToGroup {
        group_id: Uuid,
        content: PayloadContent,
    },
    /// Note-to-self: no recipient delivery, synced to our own devices only.
    ToSelf { content: PayloadContent },
}

/// The canonical message fields carried by every payload variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadContent {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub body: String,
    pub sent_at: i64,
    pub expires_in: Option<u32>,
    pub mode: MessageMode,
    /// Dedup key grouping related variants of one message (a recall carries
    /// the recalled message's id, everything else its own).
    pub collapse_id: MessageId,
    pub thread_id: Option<MessageId>,
}

impl MessagePayload {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    pub fn content(&self) -> &PayloadContent {
        match self {
            Self::ToContact { content, .. }
            | Self::ToGroup { content, .. }
            | Self::ToSelf { content } => content,
        }
    }
}

/// One grouped read-receipt send: every referenced message shares a sender
/// and a delivery mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptBatch {
    /// Author of the messages being acknowledged.
    pub sender: AccountId,
    /// Client-set send times of the acknowledged messages.
    pub timestamps: Vec<i64>,
    /// The read position that covers them.
    pub read_position: ReadPosition,
    pub mode: MessageMode,
}
