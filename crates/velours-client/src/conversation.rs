//! The conversation aggregate.
//!
//! One `Conversation` owns the working message set, the unread counter, the
//! read-position cache, and the watermarks of the two catch-up scans.  Reads
//! are best-effort from anywhere; every read-modify-write of shared state is
//! routed through the per-conversation [`JobQueue`].  The state mutex is
//! only ever held between await points, never across one.

use std::sync::{Arc, Mutex, OnceLock};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, warn};

use velours_shared::{
    AccountId, ConversationId, Destination, Message, MessageId, MessageKind, ReadPosition,
    ServerTimestamp,
};
use velours_store::{ConversationRecord, ConversationStore, MessageQuery};

use crate::coalesce::Coalescer;
use crate::config::{LocalIdentity, SyncPolicy};
use crate::events::{ChangeReason, ConversationEvent, EventSink};
use crate::job_queue::JobQueue;
use crate::positions::ReadPositionCache;
use crate::transport::TransportHandle;
use crate::unread::UnreadCounter;
use crate::window::MessageWindow;

/// Duplicate-detection probe for the drift heuristic: the identity key of
/// the last stale read-position report and when it was seen.
#[derive(Debug, Clone)]
pub(crate) struct DriftProbe {
    pub key: String,
    pub seen_at: tokio::time::Instant,
}

pub(crate) struct ConvState {
    pub window: MessageWindow,
    pub unread: UnreadCounter,
    pub positions: ReadPositionCache,
    /// Most recent read position this device has recorded.  Monotonic in
    /// `max_server_timestamp`.
    pub last_read_position: Option<ReadPosition>,
    pub last_try_position: Option<DriftProbe>,
    /// Furthest point read receipts have been sent up to.  Owned by the
    /// receipt catch-up scan.
    pub last_sent_max_at: ServerTimestamp,
    /// Furthest point our positions have been synced to our own devices.
    /// Owned by the device-sync catch-up scan.
    pub last_synced_max_at: ServerTimestamp,
    pub last_message: Option<String>,
    pub last_activity_at: i64,
    pub is_archived: bool,
    /// False once a group has been disbanded or left.
    pub group_alive: bool,
    /// Group member roster; empty for private and self conversations.
    pub members: Vec<AccountId>,
}

impl ConvState {
    fn fresh() -> Self {
        Self {
            window: MessageWindow::new(),
            unread: UnreadCounter::new(),
            positions: ReadPositionCache::new(),
            last_read_position: None,
            last_try_position: None,
            last_sent_max_at: 0,
            last_synced_max_at: 0,
            last_message: None,
            last_activity_at: 0,
            is_archived: false,
            group_alive: true,
            members: Vec::new(),
        }
    }
}

pub(crate) struct Inner {
    pub id: ConversationId,
    pub destination: Destination,
    pub identity: LocalIdentity,
    pub policy: SyncPolicy,
    pub store: Arc<dyn ConversationStore>,
    pub transport: TransportHandle,
    pub state: Mutex<ConvState>,
    pub queue: JobQueue,
    pub events: EventSink,
    receipts: OnceLock<Coalescer>,
    device_sync: OnceLock<Coalescer>,
}

impl Inner {
    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, ConvState> {
        self.state.lock().expect("conversation state lock poisoned")
    }

    pub(crate) fn trigger_receipts(&self) {
        if let Some(coalescer) = self.receipts.get() {
            coalescer.trigger();
        }
    }

    pub(crate) fn trigger_device_sync(&self) {
        if let Some(coalescer) = self.device_sync.get() {
            coalescer.trigger();
        }
    }
}

/// Display-oriented snapshot handed to the UI layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub id: String,
    pub unread_count: u64,
    pub mentioned: bool,
    pub last_message: Option<String>,
    pub last_activity_at: i64,
    pub is_archived: bool,
    pub last_read_max_server_timestamp: Option<ServerTimestamp>,
}

#[derive(Clone)]
pub struct Conversation {
    pub(crate) inner: Arc<Inner>,
}

impl Conversation {
    /// Create a fresh conversation aggregate.
    ///
    /// Spawns the two catch-up workers, so this must run inside a tokio
    /// runtime.
    pub fn new(
        id: ConversationId,
        destination: Destination,
        identity: LocalIdentity,
        policy: SyncPolicy,
        store: Arc<dyn ConversationStore>,
        transport: TransportHandle,
    ) -> Self {
        Self::build(id, destination, identity, policy, store, transport, ConvState::fresh())
    }

    /// Rehydrate an aggregate from its persisted summary snapshot.
    pub fn from_record(
        record: ConversationRecord,
        identity: LocalIdentity,
        policy: SyncPolicy,
        store: Arc<dyn ConversationStore>,
        transport: TransportHandle,
    ) -> Self {
        let mut state = ConvState::fresh();
        state.last_read_position = record.last_read_position;
        state.last_sent_max_at = record.last_sent_max_at;
        state.last_synced_max_at = record.last_synced_max_at;
        state.last_message = record.last_message;
        state.last_activity_at = record.last_activity_at;
        state.is_archived = record.is_archived;
        state.unread.overwrite(record.unread_count);
        Self::build(
            record.id,
            record.destination,
            identity,
            policy,
            store,
            transport,
            state,
        )
    }

    fn build(
        id: ConversationId,
        destination: Destination,
        identity: LocalIdentity,
        policy: SyncPolicy,
        store: Arc<dyn ConversationStore>,
        transport: TransportHandle,
        state: ConvState,
    ) -> Self {
        let job_timeout = policy.job_timeout;
        let inner = Arc::new(Inner {
            id,
            destination,
            identity,
            policy,
            store,
            transport,
            state: Mutex::new(state),
            queue: JobQueue::new(id.to_string(), job_timeout),
            events: EventSink::new(),
            receipts: OnceLock::new(),
            device_sync: OnceLock::new(),
        });

        // The workers hold only a weak handle: dropping the last
        // `Conversation` tears them down.
        let weak = Arc::downgrade(&inner);
        let _ = inner.receipts.set(Coalescer::spawn("read-receipts", move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    if let Err(e) = Self::receipt_scan(&inner).await {
                        warn!(conversation = %inner.id, error = %e, "read-receipt catch-up cycle failed");
                    }
                }
            })
        }));
        let weak = Arc::downgrade(&inner);
        let _ = inner.device_sync.set(Coalescer::spawn("device-sync", move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    if let Err(e) = Self::device_sync_scan(&inner).await {
                        warn!(conversation = %inner.id, error = %e, "device-sync catch-up cycle failed");
                    }
                }
            })
        }));

        Self { inner }
    }

    pub fn id(&self) -> ConversationId {
        self.inner.id
    }

    pub fn destination(&self) -> &Destination {
        &self.inner.destination
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.inner.events.subscribe()
    }

    /// Best-effort display snapshot; safe to call from anywhere.
    pub fn snapshot(&self) -> ConversationSnapshot {
        let st = self.inner.lock();
        ConversationSnapshot {
            id: self.inner.id.to_string(),
            unread_count: st.unread.count(),
            mentioned: st.unread.mentioned(),
            last_message: st.last_message.clone(),
            last_activity_at: st.last_activity_at,
            is_archived: st.is_archived,
            last_read_max_server_timestamp: st
                .last_read_position
                .as_ref()
                .map(|p| p.max_server_timestamp),
        }
    }

    pub fn unread_count(&self) -> u64 {
        self.inner.lock().unread.count()
    }

    pub fn last_read_position(&self) -> Option<ReadPosition> {
        self.inner.lock().last_read_position.clone()
    }

    /// Watermarks of the two catch-up scans: `(last_sent_max_at, last_synced_max_at)`.
    pub fn watermarks(&self) -> (ServerTimestamp, ServerTimestamp) {
        let st = self.inner.lock();
        (st.last_sent_max_at, st.last_synced_max_at)
    }

    pub fn is_idle(&self) -> bool {
        self.inner.queue.is_idle()
    }

    /// Record whether the newest end of history is loaded locally.  Gates
    /// the unread fast path.
    pub fn set_bottom_loaded(&self, loaded: bool) {
        self.inner.lock().window.set_bottom_loaded(loaded);
    }

    /// Replace the group member roster.
    pub fn set_members(&self, members: Vec<AccountId>) {
        self.inner.lock().members = members;
    }

    /// Mark the group as disbanded/left; sends are refused afterwards.
    pub fn set_group_alive(&self, alive: bool) {
        self.inner.lock().group_alive = alive;
    }

    // ------------------------------------------------------------------
    // Inbound entry points
    // ------------------------------------------------------------------

    /// A message entered the conversation (from the receive pipeline or our
    /// own other devices).  Updates the working set and the unread count.
    pub async fn on_message_arrival(&self, message: Message) {
        let inner = self.inner.clone();
        let job = {
            let inner = inner.clone();
            async move {
                let fresh_unread = {
                    let mut st = inner.lock();
                    let already_read = st
                        .last_read_position
                        .as_ref()
                        .is_some_and(|p| message.server_timestamp <= p.max_server_timestamp);
                    let unread =
                        message.counts_as_unread(&inner.identity.account) && !already_read;
                    let fresh = st.window.insert(message.clone());
                    if fresh && unread {
                        st.unread.on_arrival(message.mentions_self);
                    }
                    st.last_message = Some(crate::outbound::preview(&message.body));
                    st.last_activity_at = message.sent_at;
                    fresh && unread
                };
                if let Err(e) = inner.store.save_message(&message, false).await {
                    warn!(conversation = %inner.id, error = %e, "failed to persist arriving message");
                }
                inner.events.changed(ChangeReason::MessageAdded);
                if fresh_unread {
                    inner.events.changed(ChangeReason::UnreadCount);
                }
                Self::save_summary(&inner).await;
                Ok(())
            }
        };
        if let Err(e) = self.inner.queue.run("message-arrival", job).await {
            error!(conversation = %self.inner.id, error = %e, "message arrival job failed");
        }
    }

    /// A message left the working set (deleted or recalled elsewhere).
    pub async fn remove_message(&self, id: MessageId) {
        let inner = self.inner.clone();
        let job = {
            let inner = inner.clone();
            async move {
                let removed_unread = {
                    let mut st = inner.lock();
                    match st.window.remove(&id) {
                        Some(removed) => {
                            let was_unread = removed.counts_as_unread(&inner.identity.account)
                                && !st
                                    .last_read_position
                                    .as_ref()
                                    .is_some_and(|p| {
                                        removed.server_timestamp <= p.max_server_timestamp
                                    });
                            if was_unread {
                                st.unread.on_removal();
                            }
                            was_unread
                        }
                        None => false,
                    }
                };
                inner.events.changed(ChangeReason::MessageRemoved);
                if removed_unread {
                    inner.events.changed(ChangeReason::UnreadCount);
                }
                Self::save_summary(&inner).await;
                Ok(())
            }
        };
        if let Err(e) = self.inner.queue.run("message-removal", job).await {
            error!(conversation = %self.inner.id, error = %e, "message removal job failed");
        }
    }

    /// Hydrate the working set with the most recent `limit` messages.
    pub async fn load_recent(&self, limit: usize) {
        let inner = self.inner.clone();
        let job = {
            let inner = inner.clone();
            async move {
                let page = inner
                    .store
                    .messages_by_conversation(
                        &inner.id,
                        MessageQuery { limit, before_server_timestamp: None, thread_id: None },
                    )
                    .await?;
                {
                    let mut st = inner.lock();
                    for message in page.into_iter().rev() {
                        st.window.insert(message);
                    }
                    // The newest page by definition reaches the bottom.
                    st.window.set_bottom_loaded(true);
                }
                inner.events.changed(ChangeReason::MessageAdded);
                Ok(())
            }
        };
        if let Err(e) = self.inner.queue.run("load-recent", job).await {
            warn!(conversation = %self.inner.id, error = %e, "loading recent messages failed");
        }
    }

    /// Mark the conversation read up to `up_to` (or up to the newest
    /// non-outgoing message in the working set).
    pub async fn mark_as_read(&self, up_to: Option<ServerTimestamp>) {
        let position = {
            let st = self.inner.lock();
            let target = match up_to {
                Some(ts) => st.window.newest_at_or_before(ts),
                None => st.window.last_non_outgoing(),
            };
            let max_ts = up_to.or(target.map(|m| m.server_timestamp));
            max_ts.map(|max_server_timestamp| ReadPosition {
                source_device: self.inner.identity.device,
                conversation_id: self.inner.id,
                sender: target.and_then(|m| m.sender),
                sent_at: target.map_or(max_server_timestamp, |m| m.sent_at),
                read_at: Utc::now(),
                max_server_timestamp,
                message_kind: target.map_or(MessageKind::Incoming, |m| m.kind),
                max_notify_sequence_id: target.and_then(|m| m.notify_sequence_id),
            })
        };
        let Some(position) = position else { return };
        self.mark_read(position, crate::read_sync::MarkReadOptions::default()).await;
    }

    /// A read position arrived from outside: another device's sync
    /// (`from_sync`) or the local UI.  Positions learned from a sync are
    /// persisted but never re-trigger receipt sending.
    pub async fn apply_read_position(&self, position: ReadPosition, from_sync: bool) {
        let options = crate::read_sync::MarkReadOptions {
            send_read_receipts: !from_sync,
            save_position: from_sync,
            mark_read_count: None,
        };
        self.mark_read(position, options).await;
    }

    /// Load the read-position history covering `[start, end]` into the
    /// cache, fetching only what is not cached yet.
    pub async fn load_read_positions(&self, start: ServerTimestamp, end: ServerTimestamp) {
        let inner = &self.inner;
        let plan = inner.lock().positions.plan_range(start, end);
        if plan.is_noop() {
            return;
        }

        let mut fetched = Vec::new();
        let mut failed = false;
        for segment in &plan.segments {
            match inner.store.read_positions(&inner.id, *segment).await {
                Ok(mut page) => fetched.append(&mut page),
                Err(e) => {
                    // Leave the span unmarked so the next request retries.
                    warn!(conversation = %inner.id, error = %e, "read-position range fetch failed");
                    failed = true;
                }
            }
        }

        let mut supplement = Vec::new();
        if !failed && ReadPositionCache::needs_boundary_supplement(&plan, &fetched, end) {
            match inner
                .store
                .read_positions(&inner.id, ReadPositionCache::boundary_supplement_range(end))
                .await
            {
                Ok(page) => supplement = page,
                Err(e) => {
                    warn!(conversation = %inner.id, error = %e, "boundary supplement fetch failed");
                    failed = true;
                }
            }
        }

        let added = {
            let mut st = inner.lock();
            if failed {
                // Keep whatever we got, but do not extend the loaded span.
                let mut added = st.positions.add_positions(fetched);
                added.extend(st.positions.add_positions(supplement));
                added
            } else {
                let mut added = st.positions.apply_range(start, end, fetched);
                added.extend(st.positions.add_positions(supplement));
                added
            }
        };
        if !added.is_empty() {
            inner.events.emit(ConversationEvent::ReadPositionsAdded(added));
        }
    }

    /// Cached read positions, ascending.  Display-only.
    pub fn read_positions(&self) -> Vec<ReadPosition> {
        self.inner.lock().positions.iter().cloned().collect()
    }

    /// Reset the aggregate: clears the working set, counters, positions,
    /// and watermarks.  Used when the conversation or its history is wiped.
    pub async fn wipe(&self) {
        let inner = self.inner.clone();
        let job = {
            let inner = inner.clone();
            async move {
                {
                    let mut st = inner.lock();
                    st.window.clear();
                    st.unread.reset();
                    st.positions.clear();
                    st.last_read_position = None;
                    st.last_try_position = None;
                    st.last_sent_max_at = 0;
                    st.last_synced_max_at = 0;
                    st.last_message = None;
                    st.last_activity_at = 0;
                    st.is_archived = false;
                }
                inner.events.changed(ChangeReason::Summary);
                Self::save_summary(&inner).await;
                Ok(())
            }
        };
        if let Err(e) = self.inner.queue.run("wipe", job).await {
            error!(conversation = %self.inner.id, error = %e, "wipe job failed");
        }
    }

    // ------------------------------------------------------------------
    // Persistence helpers
    // ------------------------------------------------------------------

    pub(crate) async fn save_summary(inner: &Arc<Inner>) {
        let record = {
            let st = inner.lock();
            ConversationRecord {
                id: inner.id,
                destination: inner.destination.clone(),
                last_message: st.last_message.clone(),
                last_activity_at: st.last_activity_at,
                is_archived: st.is_archived,
                unread_count: st.unread.count(),
                mentioned: st.unread.mentioned(),
                last_read_position: st.last_read_position.clone(),
                last_sent_max_at: st.last_sent_max_at,
                last_synced_max_at: st.last_synced_max_at,
            }
        };
        if let Err(e) = inner.store.update_conversation(&record).await {
            warn!(conversation = %inner.id, error = %e, "failed to persist conversation summary");
        }
    }
}
