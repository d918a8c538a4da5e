//! Read-position records.
//!
//! A read position is a durable "read up to here" marker for one device in
//! one conversation.  Positions are append-only: a newer position supersedes
//! an older one, nothing is ever edited in place.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AccountId, ConversationId, DeviceId, MessageKind, ServerTimestamp};

/// One observed "read up to here" marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadPosition {
    /// Device that performed the read.
    pub source_device: DeviceId,
    pub conversation_id: ConversationId,
    /// Author of the referenced message.  `None` for locally generated
    /// markers that do not reference a specific sender.
    pub sender: Option<AccountId>,
    /// Client-set send time of the referenced message (milliseconds).
    pub sent_at: i64,
    /// When the read happened.
    pub read_at: DateTime<Utc>,
    /// Server-assigned ordering key: everything at or below this timestamp
    /// is read.  This is the true sort and comparison key.
    pub max_server_timestamp: ServerTimestamp,
    pub message_kind: MessageKind,
    /// Highest notification sequence id covered, for notification dedup.
    pub max_notify_sequence_id: Option<u64>,
}

impl ReadPosition {
    /// Idempotency key: `(source_device, conversation_id, max_server_timestamp)`.
    pub fn unique_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.source_device, self.conversation_id, self.max_server_timestamp
        )
    }

    /// Total order: by `max_server_timestamp`, ties broken by `read_at`.
    pub fn position_cmp(&self, other: &Self) -> Ordering {
        self.max_server_timestamp
            .cmp(&other.max_server_timestamp)
            .then_with(|| self.read_at.cmp(&other.read_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn position(ts: ServerTimestamp, read_at_ms: i64) -> ReadPosition {
        ReadPosition {
            source_device: DeviceId(1),
            conversation_id: ConversationId::new(),
            sender: None,
            sent_at: ts,
            read_at: Utc.timestamp_millis_opt(read_at_ms).unwrap(),
            max_server_timestamp: ts,
            message_kind: MessageKind::Incoming,
            max_notify_sequence_id: None,
        }
    }

    #[test]
    fn ordered_by_server_timestamp_then_read_at() {
        let a = position(10, 5);
        let b = position(20, 1);
        assert_eq!(a.position_cmp(&b), Ordering::Less);

        let c = position(10, 1);
        let d = position(10, 9);
        assert_eq!(c.position_cmp(&d), Ordering::Less);
    }

    #[test]
    fn unique_key_includes_device_and_timestamp() {
        let p = position(42, 0);
        let key = p.unique_key();
        assert!(key.starts_with("1-"));
        assert!(key.ends_with("-42"));
    }
}
