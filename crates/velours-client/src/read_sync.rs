//! The read-state synchronisation engine.
//!
//! Three independent directions, never conflated:
//!
//! - **inbound**: recording that this device has read up to some point
//!   ([`Conversation::mark_read`], always inside the job queue);
//! - **outbound to senders**: read receipts for messages we have read
//!   (receipt catch-up scan);
//! - **outbound to our own devices**: syncing our read-position history to
//!   linked devices (device-sync catch-up scan).
//!
//! Both catch-up scans are resumable: a crash or failure mid-scan leaves
//! the watermark at the last successfully flushed batch boundary, so the
//! next trigger re-scans only the unflushed tail.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use velours_net::{Messaging, ReceiptBatch, SendError};
use velours_shared::{Message, MessageMode, ReadPosition, ServerTimestamp};
use velours_store::{PositionRange, UnreadRange};

use crate::conversation::{Conversation, DriftProbe, Inner};
use crate::events::{ChangeReason, ConversationEvent};
use crate::unread::Reconcile;

/// Recognised fields of one `mark_read` call and their defaults.
#[derive(Debug, Clone, Copy)]
pub struct MarkReadOptions {
    /// Send read receipts to message authors (suppressed for positions
    /// learned from another device's sync).
    pub send_read_receipts: bool,
    /// Persist the position even when it is not the newest (historical
    /// catch-up).
    pub save_position: bool,
    /// Number of messages newly confirmed read, when the caller knows it
    /// exactly (bulk historical mark-read).
    pub mark_read_count: Option<u64>,
}

impl Default for MarkReadOptions {
    fn default() -> Self {
        Self { send_read_receipts: true, save_position: false, mark_read_count: None }
    }
}

impl Conversation {
    /// Record a read position.
    ///
    /// Never blocks or fails the caller: read tracking is corrective
    /// background work, so every internal failure is logged and swallowed.
    /// The heavy lifting runs as one serialized job on the conversation's
    /// queue.
    pub async fn mark_read(&self, position: ReadPosition, options: MarkReadOptions) {
        let inner = self.inner.clone();
        let job = Self::mark_read_job(inner, position, options);
        let _ = self.inner.queue.run("mark-read", job).await;
    }

    async fn mark_read_job(
        inner: Arc<Inner>,
        position: ReadPosition,
        options: MarkReadOptions,
    ) -> anyhow::Result<()> {
        let newest = position.max_server_timestamp;

        let (outcome, is_newer, window_last) = {
            let mut st = inner.lock();
            let st = &mut *st;
            let outcome = st.unread.reconcile(&st.window, newest, options.mark_read_count);
            let is_newer = st
                .last_read_position
                .as_ref()
                .map_or(true, |prior| newest > prior.max_server_timestamp);
            let window_last = st.window.last().map(|m| m.server_timestamp);
            (outcome, is_newer, window_last)
        };

        let mut saved = false;
        if is_newer {
            // Strictly newer than anything recorded: the position moves
            // forward.  When the fast path could not settle the count, take
            // the authoritative one from storage.
            if outcome == Reconcile::Deferred {
                Self::recount_from_storage(&inner, newest, window_last).await;
            }

            let added = {
                let mut st = inner.lock();
                st.last_read_position = Some(position.clone());
                st.positions.add_positions(vec![position.clone()])
            };
            if !added.is_empty() {
                inner.events.emit(ConversationEvent::ReadPositionsAdded(added));
            }
            inner.events.changed(ChangeReason::ReadPosition);

            if let Err(e) = inner.store.save_read_position(&position).await {
                warn!(conversation = %inner.id, error = %e, "failed to persist read position");
            }
            saved = true;
        } else {
            // Duplicate or stale report: never move the position backward.
            // A repeat of the same position long after its previous sighting
            // while the cached count is nonzero signals counter drift.
            let key = position.unique_key();
            let now = tokio::time::Instant::now();
            let drift = {
                let mut st = inner.lock();
                let repeat = st.last_try_position.as_ref().is_some_and(|p| p.key == key);
                let gap_exceeded = st
                    .last_try_position
                    .as_ref()
                    .is_some_and(|p| now.duration_since(p.seen_at) > inner.policy.drift_debounce);
                let drift = repeat && gap_exceeded && st.unread.count() > 0;
                st.last_try_position = Some(DriftProbe { key, seen_at: now });
                drift
            };
            if drift {
                debug!(conversation = %inner.id, position = newest, "duplicate read position, forcing recount");
                Self::recount_from_storage(&inner, newest, window_last).await;
            }
        }

        if options.save_position && !saved {
            match inner.store.save_read_position(&position).await {
                Ok(()) => {
                    let added = inner.lock().positions.add_positions(vec![position.clone()]);
                    if !added.is_empty() {
                        inner.events.emit(ConversationEvent::ReadPositionsAdded(added));
                    }
                }
                Err(e) => {
                    warn!(conversation = %inner.id, error = %e, "failed to persist historical read position");
                }
            }
        }

        if options.send_read_receipts {
            inner.trigger_receipts();
            inner.trigger_device_sync();
        }

        Self::save_summary(&inner).await;
        Ok(())
    }

    /// Authoritative unread recount over `(after, window end]`, overwriting
    /// the cached value.
    async fn recount_from_storage(
        inner: &Arc<Inner>,
        after: ServerTimestamp,
        window_last: Option<ServerTimestamp>,
    ) {
        let upto = window_last.map_or(i64::MAX, |ts| ts.max(after));
        match inner.store.unread_message_count(&inner.id, after, upto).await {
            Ok(count) => {
                inner.lock().unread.overwrite(count);
                inner.events.changed(ChangeReason::UnreadCount);
            }
            Err(e) => {
                warn!(conversation = %inner.id, error = %e, "authoritative unread recount failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Receipt catch-up
    // ------------------------------------------------------------------

    /// Scan unread history from the receipt watermark (exclusive) to the
    /// current read position (inclusive) and send read receipts, grouped by
    /// sender, in bounded batches.
    ///
    /// Normally driven by the coalesced worker; public so callers can force
    /// a synchronous catch-up.
    pub async fn send_read_position_with_history(&self) -> anyhow::Result<()> {
        Self::receipt_scan(&self.inner).await
    }

    pub(crate) async fn receipt_scan(inner: &Arc<Inner>) -> anyhow::Result<()> {
        let Some(messaging) = inner.transport.current() else {
            debug!(conversation = %inner.id, "no transport, receipt catch-up skipped");
            return Ok(());
        };

        let (start, read_position) = {
            let st = inner.lock();
            (st.last_sent_max_at, st.last_read_position.clone())
        };
        let Some(read_position) = read_position else {
            return Ok(());
        };
        let upper = read_position.max_server_timestamp;
        if start >= upper {
            return Ok(());
        }

        let mut cursor = start;
        let mut pending: Vec<Message> = Vec::new();
        loop {
            let page = inner
                .store
                .unread_messages(
                    &inner.id,
                    UnreadRange {
                        after: cursor,
                        upto: upper,
                        limit: inner.policy.receipt_page_size,
                    },
                )
                .await?;
            if page.is_empty() {
                break;
            }
            let exhausted = page.len() < inner.policy.receipt_page_size;
            cursor = page.last().map(|m| m.server_timestamp).unwrap_or(cursor);
            // Local notices have no sender to acknowledge; messages already
            // in an error state are skipped.
            pending.extend(
                page.into_iter()
                    .filter(|m| m.sender.is_some() && !m.has_delivery_errors()),
            );

            if pending.len() >= inner.policy.receipt_batch_size {
                Self::flush_receipts(
                    inner,
                    messaging.as_ref(),
                    &read_position,
                    std::mem::take(&mut pending),
                )
                .await?;
                let mut st = inner.lock();
                st.last_sent_max_at = st.last_sent_max_at.max(cursor);
            }
            if exhausted {
                break;
            }
        }

        if !pending.is_empty() {
            Self::flush_receipts(inner, messaging.as_ref(), &read_position, pending).await?;
        }
        {
            let mut st = inner.lock();
            st.last_sent_max_at = st.last_sent_max_at.max(cursor);
        }
        if cursor > start {
            Self::save_summary(inner).await;
        }
        Ok(())
    }

    /// Send one accumulated batch, grouped by `(sender, mode)`.
    ///
    /// An identity-key mismatch is retried once after refreshing the peer's
    /// profile; any other failure (or a second mismatch) aborts the flush,
    /// and the caller leaves the watermark at the previous boundary.
    async fn flush_receipts(
        inner: &Arc<Inner>,
        messaging: &dyn Messaging,
        read_position: &ReadPosition,
        batch: Vec<Message>,
    ) -> anyhow::Result<()> {
        let mut groups: BTreeMap<(velours_shared::AccountId, MessageMode), Vec<i64>> =
            BTreeMap::new();
        for message in &batch {
            let Some(sender) = message.sender else { continue };
            groups.entry((sender, message.mode)).or_default().push(message.sent_at);
        }

        for ((sender, mode), timestamps) in groups {
            let receipt = ReceiptBatch {
                sender,
                timestamps,
                read_position: read_position.clone(),
                mode,
            };
            match messaging.send_read_receipts(&inner.id, receipt.clone()).await {
                Ok(()) => {}
                Err(SendError::IdentityKeyMismatch { .. }) => {
                    debug!(conversation = %inner.id, peer = %sender.short(), "identity mismatch, refreshing profile and retrying");
                    messaging.refresh_profile(&sender).await?;
                    messaging.send_read_receipts(&inner.id, receipt).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Device-sync catch-up
    // ------------------------------------------------------------------

    /// Scan our own read-position history from the sync watermark forward
    /// and sync it to our other linked devices in bounded batches.
    pub async fn sync_read_position_with_history(&self) -> anyhow::Result<()> {
        Self::device_sync_scan(&self.inner).await
    }

    pub(crate) async fn device_sync_scan(inner: &Arc<Inner>) -> anyhow::Result<()> {
        let Some(messaging) = inner.transport.current() else {
            debug!(conversation = %inner.id, "no transport, device sync skipped");
            return Ok(());
        };

        let start = inner.lock().last_synced_max_at;
        let mut cursor = start;
        let mut pending: Vec<ReadPosition> = Vec::new();
        loop {
            let page = inner
                .store
                .read_positions(
                    &inner.id,
                    PositionRange {
                        begin: Some(cursor),
                        end: None,
                        include_begin: false,
                        include_end: false,
                        limit: Some(inner.policy.sync_page_size),
                    },
                )
                .await?;
            if page.is_empty() {
                break;
            }
            let exhausted = page.len() < inner.policy.sync_page_size;
            cursor = page.last().map(|p| p.max_server_timestamp).unwrap_or(cursor);
            // Only positions this device produced are ours to sync.
            pending.extend(page.into_iter().filter(|p| p.source_device == inner.identity.device));

            if pending.len() >= inner.policy.sync_batch_size {
                messaging
                    .sync_read_positions(&inner.id, std::mem::take(&mut pending))
                    .await?;
                let mut st = inner.lock();
                st.last_synced_max_at = st.last_synced_max_at.max(cursor);
            }
            if exhausted {
                break;
            }
        }

        if !pending.is_empty() {
            messaging.sync_read_positions(&inner.id, pending).await?;
        }
        {
            let mut st = inner.lock();
            st.last_synced_max_at = st.last_synced_max_at.max(cursor);
        }
        if cursor > start {
            Self::save_summary(inner).await;
        }
        Ok(())
    }
}
