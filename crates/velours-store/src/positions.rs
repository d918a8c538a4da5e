//! CRUD operations for [`ReadPosition`] rows.
//!
//! The table's primary key is the position identity key, so saves are
//! idempotent and range scans never see duplicates.

use chrono::{DateTime, Utc};
use rusqlite::params_from_iter;
use rusqlite::types::Value;

use velours_shared::{
    AccountId, ConversationId, DeviceId, MessageKind, ReadPosition,
};

use crate::access::PositionRange;
use crate::database::Database;
use crate::error::Result;

const POSITION_COLUMNS: &str = "conversation_id, source_device, max_server_timestamp, sender, \
     sent_at, read_at, message_kind, max_notify_sequence_id";

impl Database {
    /// Persist a read position.  Re-saving the same identity key is a no-op
    /// overwrite.
    pub fn save_read_position(&self, position: &ReadPosition) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO read_positions (conversation_id, source_device, \
             max_server_timestamp, sender, sent_at, read_at, message_kind, max_notify_sequence_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                position.conversation_id.to_string(),
                position.source_device.0,
                position.max_server_timestamp,
                position.sender.map(|s| s.to_hex()),
                position.sent_at,
                position.read_at.to_rfc3339(),
                position.message_kind.as_str(),
                position.max_notify_sequence_id.map(|v| v as i64),
            ],
        )?;
        Ok(())
    }

    /// Read positions in `range`, ordered ascending by
    /// `(max_server_timestamp, read_at)`.
    ///
    /// The `include_begin` / `include_end` flags pick the comparison
    /// operator for each bound; an absent bound is unbounded.
    pub fn read_positions_in_range(
        &self,
        id: &ConversationId,
        range: &PositionRange,
    ) -> Result<Vec<ReadPosition>> {
        let mut sql = format!(
            "SELECT {POSITION_COLUMNS} FROM read_positions WHERE conversation_id = ?"
        );
        let mut values: Vec<Value> = vec![Value::Text(id.to_string())];

        if let Some(begin) = range.begin {
            sql.push_str(if range.include_begin {
                " AND max_server_timestamp >= ?"
            } else {
                " AND max_server_timestamp > ?"
            });
            values.push(Value::Integer(begin));
        }
        if let Some(end) = range.end {
            sql.push_str(if range.include_end {
                " AND max_server_timestamp <= ?"
            } else {
                " AND max_server_timestamp < ?"
            });
            values.push(Value::Integer(end));
        }

        sql.push_str(" ORDER BY max_server_timestamp ASC, read_at ASC LIMIT ?");
        values.push(Value::Integer(
            range.limit.map(|l| l as i64).unwrap_or(-1),
        ));

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_position)?;

        let mut positions = Vec::new();
        for row in rows {
            positions.push(row?);
        }
        Ok(positions)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`ReadPosition`].
fn row_to_position(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReadPosition> {
    let conversation_str: String = row.get(0)?;
    let source_device: u32 = row.get(1)?;
    let max_server_timestamp: i64 = row.get(2)?;
    let sender_hex: Option<String> = row.get(3)?;
    let sent_at: i64 = row.get(4)?;
    let read_str: String = row.get(5)?;
    let kind_str: String = row.get(6)?;
    let max_notify_sequence_id: Option<i64> = row.get(7)?;

    let conversation_id = uuid::Uuid::parse_str(&conversation_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let sender = sender_hex
        .map(|s| {
            AccountId::from_hex(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?;

    let read_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&read_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let message_kind = MessageKind::from_str(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown message kind: {kind_str}").into(),
        )
    })?;

    Ok(ReadPosition {
        source_device: DeviceId(source_device),
        conversation_id: ConversationId(conversation_id),
        sender,
        sent_at,
        read_at,
        max_server_timestamp,
        message_kind,
        max_notify_sequence_id: max_notify_sequence_id.map(|v| v as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(conversation: ConversationId, ts: i64) -> ReadPosition {
        ReadPosition {
            source_device: DeviceId(1),
            conversation_id: conversation,
            sender: None,
            sent_at: ts,
            read_at: Utc::now(),
            max_server_timestamp: ts,
            message_kind: MessageKind::Incoming,
            max_notify_sequence_id: None,
        }
    }

    fn db_with_positions(conversation: ConversationId, timestamps: &[i64]) -> Database {
        let db = Database::open_in_memory().unwrap();
        for &ts in timestamps {
            db.save_read_position(&position(conversation, ts)).unwrap();
        }
        db
    }

    #[test]
    fn range_flags_pick_comparison_operators() {
        let conversation = ConversationId::new();
        let db = db_with_positions(conversation, &[10, 20, 30, 40]);

        let closed = db
            .read_positions_in_range(
                &conversation,
                &PositionRange {
                    begin: Some(10),
                    end: Some(30),
                    include_begin: true,
                    include_end: true,
                    limit: None,
                },
            )
            .unwrap();
        assert_eq!(
            closed.iter().map(|p| p.max_server_timestamp).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );

        let open = db
            .read_positions_in_range(
                &conversation,
                &PositionRange {
                    begin: Some(10),
                    end: Some(30),
                    include_begin: false,
                    include_end: false,
                    limit: None,
                },
            )
            .unwrap();
        assert_eq!(
            open.iter().map(|p| p.max_server_timestamp).collect::<Vec<_>>(),
            vec![20]
        );
    }

    #[test]
    fn unbounded_scan_respects_limit() {
        let conversation = ConversationId::new();
        let db = db_with_positions(conversation, &[1, 2, 3, 4, 5]);

        let page = db
            .read_positions_in_range(
                &conversation,
                &PositionRange {
                    begin: Some(1),
                    end: None,
                    include_begin: false,
                    include_end: false,
                    limit: Some(2),
                },
            )
            .unwrap();
        assert_eq!(
            page.iter().map(|p| p.max_server_timestamp).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn resaving_identity_key_is_idempotent() {
        let conversation = ConversationId::new();
        let db = db_with_positions(conversation, &[100]);

        db.save_read_position(&position(conversation, 100)).unwrap();

        let all = db
            .read_positions_in_range(&conversation, &PositionRange::default())
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn other_conversations_are_invisible() {
        let a = ConversationId::new();
        let db = db_with_positions(a, &[5]);
        db.save_read_position(&position(ConversationId::new(), 7))
            .unwrap();

        let all = db.read_positions_in_range(&a, &PositionRange::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].max_server_timestamp, 5);
    }
}
