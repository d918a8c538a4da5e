//! The data-access interface consumed by the conversation core.
//!
//! Range queries are half-open or closed per explicit flags; callers must
//! never assume defaults.  Implementations other than the bundled SQLite one
//! (test doubles, remote stores) report failures as
//! [`StoreError::Backend`](crate::StoreError).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use velours_shared::{
    ConversationId, Destination, Message, MessageId, ReadPosition, ServerTimestamp,
};

use crate::error::StoreError;

/// Query for a page of a conversation's message history, newest first.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub limit: usize,
    /// Exclusive upper bound on `server_timestamp`; `None` means newest.
    pub before_server_timestamp: Option<ServerTimestamp>,
    /// Restrict to one thread.
    pub thread_id: Option<MessageId>,
}

/// Range query over read positions, ordered ascending by
/// `max_server_timestamp`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionRange {
    pub begin: Option<ServerTimestamp>,
    pub end: Option<ServerTimestamp>,
    pub include_begin: bool,
    pub include_end: bool,
    pub limit: Option<usize>,
}

/// Range scan over unread (incoming) messages: `server_timestamp` in
/// `(after, upto]`, ascending, at most `limit` rows.
#[derive(Debug, Clone, Copy)]
pub struct UnreadRange {
    pub after: ServerTimestamp,
    pub upto: ServerTimestamp,
    pub limit: usize,
}

/// Durable summary snapshot of one conversation.
///
/// Unread-ness is derived positionally from read-position watermarks, so the
/// record carries the watermarks alongside the displayed counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub destination: Destination,
    /// Preview of the latest message.
    pub last_message: Option<String>,
    /// Milliseconds; drives conversation-list ordering.
    pub last_activity_at: i64,
    pub is_archived: bool,
    pub unread_count: u64,
    /// Pending-mention flag.
    pub mentioned: bool,
    /// Most recent read position this device has recorded.
    pub last_read_position: Option<ReadPosition>,
    /// Furthest point read receipts have been sent up to.
    pub last_sent_max_at: ServerTimestamp,
    /// Furthest point our read positions have been synced to our own
    /// other devices.
    pub last_synced_max_at: ServerTimestamp,
}

/// Abstract durable storage for conversations, messages, and read positions.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Page of message history, newest first.
    async fn messages_by_conversation(
        &self,
        id: &ConversationId,
        query: MessageQuery,
    ) -> Result<Vec<Message>, StoreError>;

    /// Unread (incoming) messages with `server_timestamp` in
    /// `(after, upto]`, ascending.
    async fn unread_messages(
        &self,
        id: &ConversationId,
        range: UnreadRange,
    ) -> Result<Vec<Message>, StoreError>;

    /// Count of unread (incoming) messages with `server_timestamp` in
    /// `(after, upto]`.
    async fn unread_message_count(
        &self,
        id: &ConversationId,
        after: ServerTimestamp,
        upto: ServerTimestamp,
    ) -> Result<u64, StoreError>;

    /// Persist a message.  With `force` the write always happens; without
    /// it an unchanged row is left untouched (dedup by change detection).
    async fn save_message(&self, message: &Message, force: bool) -> Result<(), StoreError>;

    /// Read positions in the given range, ascending.
    async fn read_positions(
        &self,
        id: &ConversationId,
        range: PositionRange,
    ) -> Result<Vec<ReadPosition>, StoreError>;

    /// Persist a read position.  Idempotent on the identity key
    /// `(source_device, conversation_id, max_server_timestamp)`.
    async fn save_read_position(&self, position: &ReadPosition) -> Result<(), StoreError>;

    /// Upsert the conversation summary snapshot.
    async fn update_conversation(&self, record: &ConversationRecord) -> Result<(), StoreError>;

    /// Load the conversation summary snapshot, if one was ever saved.
    async fn conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationRecord>, StoreError>;
}
