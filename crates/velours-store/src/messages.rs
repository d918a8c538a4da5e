//! CRUD operations for [`Message`] rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use velours_shared::{
    AccountId, ConversationId, DeviceId, Message, MessageId, MessageKind, MessageMode, SendState,
    ServerTimestamp,
};

use crate::access::{MessageQuery, UnreadRange};
use crate::database::Database;
use crate::error::Result;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender, source_device, kind, body, sent_at, \
     server_timestamp, notify_sequence_id, thread_id, expires_in, mode, recall_of, \
     translate_lang, send_state, delivery_errors, mentions_self, received_at";

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Persist a message.
    ///
    /// Without `force`, an unchanged row is left untouched (dedup by change
    /// detection); with it the write always happens, which is what the
    /// outbound pipeline uses for optimistic saves.
    pub fn save_message(&self, message: &Message, force: bool) -> Result<()> {
        if !force {
            if let Some(existing) = self.message_by_id(&message.id)? {
                if &existing == message {
                    tracing::debug!(message = %message.id, "message unchanged, skipping save");
                    return Ok(());
                }
            }
        }

        self.conn().execute(
            "INSERT OR REPLACE INTO messages (id, conversation_id, sender, source_device, kind, \
             body, sent_at, server_timestamp, notify_sequence_id, thread_id, expires_in, mode, \
             recall_of, translate_lang, send_state, delivery_errors, mentions_self, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sender.map(|s| s.to_hex()),
                message.source_device.0,
                message.kind.as_str(),
                message.body,
                message.sent_at,
                message.server_timestamp,
                message.notify_sequence_id.map(|v| v as i64),
                message.thread_id.map(|t| t.to_string()),
                message.expires_in,
                message.mode.as_str(),
                message.recall_of.map(|r| r.to_string()),
                message.translate_lang,
                message.send_state.map(|s| s.as_str()),
                serde_json::to_string(&message.delivery_errors)?,
                message.mentions_self,
                message.received_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single message by id, if present.
    pub fn message_by_id(&self, id: &MessageId) -> Result<Option<Message>> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .optional()?;
        Ok(row)
    }

    /// Page of a conversation's history, newest first, optionally bounded
    /// above (exclusive) and restricted to one thread.
    pub fn messages_by_conversation(
        &self,
        id: &ConversationId,
        query: &MessageQuery,
    ) -> Result<Vec<Message>> {
        let before = query.before_server_timestamp.unwrap_or(i64::MAX);
        let limit = query.limit as i64;

        let mut out = Vec::new();
        match query.thread_id {
            Some(thread) => {
                let mut stmt = self.conn().prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1 AND server_timestamp < ?2 AND thread_id = ?3
                     ORDER BY server_timestamp DESC
                     LIMIT ?4"
                ))?;
                let rows = stmt.query_map(
                    params![id.to_string(), before, thread.to_string(), limit],
                    row_to_message,
                )?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn().prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1 AND server_timestamp < ?2
                     ORDER BY server_timestamp DESC
                     LIMIT ?3"
                ))?;
                let rows =
                    stmt.query_map(params![id.to_string(), before, limit], row_to_message)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Unread (incoming) messages with `server_timestamp` in
    /// `(after, upto]`, ascending.
    pub fn unread_messages(&self, id: &ConversationId, range: &UnreadRange) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1 AND kind = 'incoming'
               AND server_timestamp > ?2 AND server_timestamp <= ?3
             ORDER BY server_timestamp ASC
             LIMIT ?4"
        ))?;

        let rows = stmt.query_map(
            params![id.to_string(), range.after, range.upto, range.limit as i64],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Count of unread (incoming) messages with `server_timestamp` in
    /// `(after, upto]`.
    pub fn unread_message_count(
        &self,
        id: &ConversationId,
        after: ServerTimestamp,
        upto: ServerTimestamp,
    ) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE conversation_id = ?1 AND kind = 'incoming'
               AND server_timestamp > ?2 AND server_timestamp <= ?3",
            params![id.to_string(), after, upto],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let sender_hex: Option<String> = row.get(2)?;
    let source_device: u32 = row.get(3)?;
    let kind_str: String = row.get(4)?;
    let body: String = row.get(5)?;
    let sent_at: i64 = row.get(6)?;
    let server_timestamp: i64 = row.get(7)?;
    let notify_sequence_id: Option<i64> = row.get(8)?;
    let thread_str: Option<String> = row.get(9)?;
    let expires_in: Option<u32> = row.get(10)?;
    let mode_str: String = row.get(11)?;
    let recall_str: Option<String> = row.get(12)?;
    let translate_lang: Option<String> = row.get(13)?;
    let send_state_str: Option<String> = row.get(14)?;
    let errors_json: String = row.get(15)?;
    let mentions_self: bool = row.get(16)?;
    let received_str: String = row.get(17)?;

    let id = parse_uuid(0, &id_str)?;
    let conversation_id = parse_uuid(1, &conversation_str)?;

    let sender = sender_hex
        .map(|s| {
            AccountId::from_hex(&s)
                .map_err(|e| conversion_error(2, format!("bad sender key: {e}")))
        })
        .transpose()?;

    let kind = MessageKind::from_str(&kind_str)
        .ok_or_else(|| conversion_error(4, format!("unknown message kind: {kind_str}")))?;

    let thread_id = thread_str.map(|s| parse_uuid(9, &s)).transpose()?;
    let mode = MessageMode::from_str(&mode_str)
        .ok_or_else(|| conversion_error(11, format!("unknown message mode: {mode_str}")))?;
    let recall_of = recall_str.map(|s| parse_uuid(12, &s)).transpose()?;

    let send_state = send_state_str
        .map(|s| {
            SendState::from_str(&s)
                .ok_or_else(|| conversion_error(14, format!("unknown send state: {s}")))
        })
        .transpose()?;

    let delivery_errors = serde_json::from_str(&errors_json)
        .map_err(|e| conversion_error(15, format!("bad delivery errors: {e}")))?;

    let received_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&received_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(17, format!("bad received_at: {e}")))?;

    Ok(Message {
        id: MessageId(id),
        conversation_id: ConversationId(conversation_id),
        sender,
        source_device: DeviceId(source_device),
        kind,
        body,
        sent_at,
        server_timestamp,
        notify_sequence_id: notify_sequence_id.map(|v| v as u64),
        thread_id: thread_id.map(MessageId),
        expires_in,
        mode,
        recall_of: recall_of.map(MessageId),
        translate_lang,
        send_state,
        delivery_errors,
        mentions_self,
        received_at,
    })
}

fn parse_uuid(column: usize, s: &str) -> rusqlite::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn conversion_error(column: usize, detail: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        detail.into(),
    )
}
