//! The in-memory working set of a conversation's messages.
//!
//! Ordered by server timestamp; not necessarily the full history.  The
//! `bottom_loaded` flag records whether the newest end of history is present
//! locally, which gates the unread fast path.

use std::collections::{BTreeMap, HashMap};

use velours_shared::{Message, MessageId, MessageKind, ServerTimestamp};

#[derive(Debug, Default)]
pub struct MessageWindow {
    // Keyed by (server_timestamp, id) so unconfirmed messages (timestamp 0)
    // sort first and ties stay stable.
    by_timestamp: BTreeMap<(ServerTimestamp, MessageId), Message>,
    index: HashMap<MessageId, (ServerTimestamp, MessageId)>,
    bottom_loaded: bool,
}

impl MessageWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_timestamp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_timestamp.is_empty()
    }

    pub fn bottom_loaded(&self) -> bool {
        self.bottom_loaded
    }

    pub fn set_bottom_loaded(&mut self, loaded: bool) {
        self.bottom_loaded = loaded;
    }

    /// Insert or replace.  Returns `false` when a message with this id was
    /// already present (it is re-keyed if its server timestamp changed).
    pub fn insert(&mut self, message: Message) -> bool {
        let fresh = self.remove(&message.id).is_none();
        let key = (message.server_timestamp, message.id);
        self.index.insert(message.id, key);
        self.by_timestamp.insert(key, message);
        fresh
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let key = self.index.remove(id)?;
        self.by_timestamp.remove(&key)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.index.get(id).and_then(|key| self.by_timestamp.get(key))
    }

    /// Mutate one message in place; the caller must not change its ordering
    /// key (use `insert` for that).
    pub fn update<F: FnOnce(&mut Message)>(&mut self, id: &MessageId, f: F) -> bool {
        if let Some(key) = self.index.get(id) {
            if let Some(msg) = self.by_timestamp.get_mut(key) {
                f(msg);
                return true;
            }
        }
        false
    }

    /// Newest message in the working set.
    pub fn last(&self) -> Option<&Message> {
        self.by_timestamp.values().next_back()
    }

    /// Newest message with `server_timestamp <= ts`.
    pub fn newest_at_or_before(&self, ts: ServerTimestamp) -> Option<&Message> {
        self.by_timestamp
            .range(..=(ts, MessageId(uuid::Uuid::from_u128(u128::MAX))))
            .next_back()
            .map(|(_, m)| m)
    }

    /// Newest incoming message.
    pub fn last_incoming(&self) -> Option<&Message> {
        self.by_timestamp
            .values()
            .rev()
            .find(|m| m.kind == MessageKind::Incoming)
    }

    /// Newest message that is not outgoing (incoming or local notice).
    pub fn last_non_outgoing(&self) -> Option<&Message> {
        self.by_timestamp
            .values()
            .rev()
            .find(|m| m.kind != MessageKind::Outgoing)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.by_timestamp.values()
    }

    pub fn clear(&mut self) {
        self.by_timestamp.clear();
        self.index.clear();
        self.bottom_loaded = false;
    }
}
