//! CRUD operations for conversation summary snapshots.

use rusqlite::{params, OptionalExtension};

use velours_shared::ConversationId;

use crate::access::ConversationRecord;
use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Upsert the summary snapshot for one conversation.
    pub fn upsert_conversation(&self, record: &ConversationRecord) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO conversations (id, destination, last_message, \
             last_activity_at, is_archived, unread_count, mentioned, last_read_position, \
             last_sent_max_at, last_synced_max_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id.to_string(),
                serde_json::to_string(&record.destination)?,
                record.last_message,
                record.last_activity_at,
                record.is_archived,
                record.unread_count as i64,
                record.mentioned,
                record
                    .last_read_position
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                record.last_sent_max_at,
                record.last_synced_max_at,
            ],
        )?;
        Ok(())
    }

    /// Load the summary snapshot for one conversation, if any was saved.
    pub fn conversation_by_id(&self, id: &ConversationId) -> Result<Option<ConversationRecord>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, destination, last_message, last_activity_at, is_archived, \
                 unread_count, mentioned, last_read_position, last_sent_max_at, last_synced_max_at
                 FROM conversations WHERE id = ?1",
                params![id.to_string()],
                row_to_record,
            )
            .optional()?;
        Ok(row)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`ConversationRecord`].
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRecord> {
    let id_str: String = row.get(0)?;
    let destination_json: String = row.get(1)?;
    let last_message: Option<String> = row.get(2)?;
    let last_activity_at: i64 = row.get(3)?;
    let is_archived: bool = row.get(4)?;
    let unread_count: i64 = row.get(5)?;
    let mentioned: bool = row.get(6)?;
    let position_json: Option<String> = row.get(7)?;
    let last_sent_max_at: i64 = row.get(8)?;
    let last_synced_max_at: i64 = row.get(9)?;

    let id = uuid::Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let destination = serde_json::from_str(&destination_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let last_read_position = position_json
        .map(|json| {
            serde_json::from_str(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    7,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?;

    Ok(ConversationRecord {
        id: ConversationId(id),
        destination,
        last_message,
        last_activity_at,
        is_archived,
        unread_count: unread_count.max(0) as u64,
        mentioned,
        last_read_position,
        last_sent_max_at,
        last_synced_max_at,
    })
}
