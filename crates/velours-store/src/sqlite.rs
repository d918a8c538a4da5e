//! [`ConversationStore`] adapter over the SQLite [`Database`].
//!
//! rusqlite is synchronous; the handle lives behind a mutex that is only
//! held for the duration of one query, never across an await point.

use std::sync::Mutex;

use async_trait::async_trait;

use velours_shared::{ConversationId, Message, ReadPosition, ServerTimestamp};

use crate::access::{
    ConversationRecord, ConversationStore, MessageQuery, PositionRange, UnreadRange,
};
use crate::database::Database;
use crate::error::{Result, StoreError};

pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let guard = self
            .db
            .lock()
            .map_err(|e| StoreError::Backend(format!("database lock poisoned: {e}")))?;
        f(&guard)
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn messages_by_conversation(
        &self,
        id: &ConversationId,
        query: MessageQuery,
    ) -> Result<Vec<Message>> {
        self.with_db(|db| db.messages_by_conversation(id, &query))
    }

    async fn unread_messages(&self, id: &ConversationId, range: UnreadRange) -> Result<Vec<Message>> {
        self.with_db(|db| db.unread_messages(id, &range))
    }

    async fn unread_message_count(
        &self,
        id: &ConversationId,
        after: ServerTimestamp,
        upto: ServerTimestamp,
    ) -> Result<u64> {
        self.with_db(|db| db.unread_message_count(id, after, upto))
    }

    async fn save_message(&self, message: &Message, force: bool) -> Result<()> {
        self.with_db(|db| db.save_message(message, force))
    }

    async fn read_positions(
        &self,
        id: &ConversationId,
        range: PositionRange,
    ) -> Result<Vec<ReadPosition>> {
        self.with_db(|db| db.read_positions_in_range(id, &range))
    }

    async fn save_read_position(&self, position: &ReadPosition) -> Result<()> {
        self.with_db(|db| db.save_read_position(position))
    }

    async fn update_conversation(&self, record: &ConversationRecord) -> Result<()> {
        self.with_db(|db| db.upsert_conversation(record))
    }

    async fn conversation(&self, id: &ConversationId) -> Result<Option<ConversationRecord>> {
        self.with_db(|db| db.conversation_by_id(id))
    }
}
