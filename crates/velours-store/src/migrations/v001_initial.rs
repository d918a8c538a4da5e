//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `conversations`, `messages`, and
//! `read_positions`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations (summary snapshots)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id                  TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    destination         TEXT NOT NULL,              -- JSON (private / group / self)
    last_message        TEXT,                       -- latest message preview
    last_activity_at    INTEGER NOT NULL DEFAULT 0, -- milliseconds
    is_archived         INTEGER NOT NULL DEFAULT 0,
    unread_count        INTEGER NOT NULL DEFAULT 0,
    mentioned           INTEGER NOT NULL DEFAULT 0,
    last_read_position  TEXT,                       -- JSON ReadPosition
    last_sent_max_at    INTEGER NOT NULL DEFAULT 0, -- receipt watermark
    last_synced_max_at  INTEGER NOT NULL DEFAULT 0  -- device-sync watermark
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
-- No foreign key to conversations: the summary row is a cache that may be
-- written after the first message arrives.
CREATE TABLE IF NOT EXISTS messages (
    id                 TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    conversation_id    TEXT NOT NULL,
    sender             TEXT,                        -- hex account key, NULL for local notices
    source_device      INTEGER NOT NULL DEFAULT 0,
    kind               TEXT NOT NULL,               -- incoming / outgoing / local
    body               TEXT NOT NULL,
    sent_at            INTEGER NOT NULL,            -- client-set, milliseconds
    server_timestamp   INTEGER NOT NULL,            -- server-assigned ordering key
    notify_sequence_id INTEGER,
    thread_id          TEXT,
    expires_in         INTEGER,
    mode               TEXT NOT NULL DEFAULT 'normal',
    recall_of          TEXT,
    translate_lang     TEXT,
    send_state         TEXT,                        -- sending / sent / failed
    delivery_errors    TEXT NOT NULL DEFAULT '[]',  -- JSON array
    mentions_self      INTEGER NOT NULL DEFAULT 0,
    received_at        TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, server_timestamp);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_kind_ts
    ON messages(conversation_id, kind, server_timestamp);

-- ----------------------------------------------------------------
-- Read positions (append-only)
-- ----------------------------------------------------------------
-- The primary key is the position identity key, which makes saves
-- idempotent.
CREATE TABLE IF NOT EXISTS read_positions (
    conversation_id        TEXT NOT NULL,
    source_device          INTEGER NOT NULL,
    max_server_timestamp   INTEGER NOT NULL,        -- the ordering key
    sender                 TEXT,                    -- hex account key, nullable
    sent_at                INTEGER NOT NULL,
    read_at                TEXT NOT NULL,           -- ISO-8601 / RFC-3339
    message_kind           TEXT NOT NULL,
    max_notify_sequence_id INTEGER,

    PRIMARY KEY (conversation_id, source_device, max_server_timestamp)
);

CREATE INDEX IF NOT EXISTS idx_read_positions_conversation_ts
    ON read_positions(conversation_id, max_server_timestamp);
"#;

/// Apply the v001 schema.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
