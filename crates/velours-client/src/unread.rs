//! Unread-count bookkeeping.
//!
//! The counter is only ever written from inside a serialized conversation
//! job, so read-modify-write races cannot lose updates.  The count is
//! unsigned: it cannot go negative by construction.

use tracing::debug;

use velours_shared::ServerTimestamp;

use crate::window::MessageWindow;

/// Outcome of a [`UnreadCounter::reconcile`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// Caught-up fast path: count and mention flag cleared.
    Cleared,
    /// An explicit mark-read count was subtracted (floored at zero).
    Adjusted(u64),
    /// Nothing could be decided locally; a later authoritative recount
    /// settles it.
    Deferred,
}

#[derive(Debug, Default)]
pub struct UnreadCounter {
    count: u64,
    mentioned: bool,
}

impl UnreadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mentioned(&self) -> bool {
        self.mentioned
    }

    /// Reconcile against a newly observed read position.
    ///
    /// The fast path answers "is the reader caught up?" from the working set
    /// alone, without a database count: with the bottom of history loaded,
    /// the conversation is caught up when there is nothing non-outgoing to
    /// read, when the newest message is our own, or when the position lands
    /// exactly on the newest / newest-incoming / newest-non-outgoing
    /// message.
    pub fn reconcile(
        &mut self,
        window: &MessageWindow,
        newest_read: ServerTimestamp,
        mark_read_count: Option<u64>,
    ) -> Reconcile {
        if window.bottom_loaded() {
            let caught_up = match window.last_non_outgoing() {
                None => true,
                Some(last_non_outgoing) => {
                    window
                        .last()
                        .is_some_and(|m| m.kind == velours_shared::MessageKind::Outgoing)
                        || window.last().is_some_and(|m| m.server_timestamp == newest_read)
                        || window
                            .last_incoming()
                            .is_some_and(|m| m.server_timestamp == newest_read)
                        || last_non_outgoing.server_timestamp == newest_read
                }
            };
            if caught_up {
                self.count = 0;
                self.mentioned = false;
                return Reconcile::Cleared;
            }
        }

        if let Some(n) = mark_read_count {
            self.count = self.count.saturating_sub(n);
            return Reconcile::Adjusted(self.count);
        }

        Reconcile::Deferred
    }

    /// Overwrite with an authoritative count from storage.
    pub fn overwrite(&mut self, count: u64) {
        if self.count != count {
            debug!(cached = self.count, authoritative = count, "unread count corrected");
        }
        self.count = count;
        if count == 0 {
            self.mentioned = false;
        }
    }

    /// A new unread message arrived.
    pub fn on_arrival(&mut self, mentions_self: bool) {
        self.count += 1;
        if mentions_self {
            self.mentioned = true;
        }
    }

    /// An unread message left the working set.
    pub fn on_removal(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.mentioned = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use velours_shared::{
        AccountId, ConversationId, DeviceId, Message, MessageId, MessageKind, MessageMode,
    };

    fn message(ts: ServerTimestamp, kind: MessageKind) -> Message {
        Message {
            id: MessageId::new(),
            conversation_id: ConversationId::new(),
            sender: (kind == MessageKind::Incoming).then(|| AccountId([2u8; 32])),
            source_device: DeviceId(1),
            kind,
            body: String::new(),
            sent_at: ts,
            server_timestamp: ts,
            notify_sequence_id: None,
            thread_id: None,
            expires_in: None,
            mode: MessageMode::Normal,
            recall_of: None,
            translate_lang: None,
            send_state: None,
            delivery_errors: Vec::new(),
            mentions_self: false,
            received_at: Utc::now(),
        }
    }

    fn window_with(kinds: &[(ServerTimestamp, MessageKind)], bottom: bool) -> MessageWindow {
        let mut w = MessageWindow::new();
        for &(ts, kind) in kinds {
            w.insert(message(ts, kind));
        }
        w.set_bottom_loaded(bottom);
        w
    }

    #[test]
    fn clears_when_position_matches_newest_incoming() {
        let w = window_with(&[(10, MessageKind::Incoming), (20, MessageKind::Incoming)], true);
        let mut c = UnreadCounter::new();
        c.on_arrival(true);
        c.on_arrival(false);

        assert_eq!(c.reconcile(&w, 20, None), Reconcile::Cleared);
        assert_eq!(c.count(), 0);
        assert!(!c.mentioned());
    }

    #[test]
    fn clears_when_newest_is_outgoing() {
        let w = window_with(&[(10, MessageKind::Incoming), (30, MessageKind::Outgoing)], true);
        let mut c = UnreadCounter::new();
        c.on_arrival(false);

        assert_eq!(c.reconcile(&w, 10, None), Reconcile::Cleared);
    }

    #[test]
    fn clears_when_nothing_non_outgoing_exists() {
        let w = window_with(&[(30, MessageKind::Outgoing)], true);
        let mut c = UnreadCounter::new();
        c.overwrite(2);

        assert_eq!(c.reconcile(&w, 1, None), Reconcile::Cleared);
    }

    #[test]
    fn without_bottom_loaded_fast_path_is_unavailable() {
        let w = window_with(&[(20, MessageKind::Incoming)], false);
        let mut c = UnreadCounter::new();
        c.overwrite(5);

        assert_eq!(c.reconcile(&w, 20, None), Reconcile::Deferred);
        assert_eq!(c.count(), 5);
    }

    #[test]
    fn explicit_count_subtracts_with_floor() {
        let w = window_with(&[(20, MessageKind::Incoming), (30, MessageKind::Incoming)], true);
        let mut c = UnreadCounter::new();
        c.overwrite(3);

        assert_eq!(c.reconcile(&w, 10, Some(2)), Reconcile::Adjusted(1));
        assert_eq!(c.reconcile(&w, 15, Some(9)), Reconcile::Adjusted(0));
        assert_eq!(c.count(), 0);
    }

    #[test]
    fn stale_position_mid_history_defers() {
        let w = window_with(&[(20, MessageKind::Incoming), (30, MessageKind::Incoming)], true);
        let mut c = UnreadCounter::new();
        c.overwrite(2);

        assert_eq!(c.reconcile(&w, 25, None), Reconcile::Deferred);
        assert_eq!(c.count(), 2);
    }
}
