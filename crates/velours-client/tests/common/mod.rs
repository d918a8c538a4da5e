//! Shared fixtures for the conversation-core integration tests: an
//! in-memory [`ConversationStore`] with call counters and scriptable
//! failures, and a recording [`Messaging`] double.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use velours_client::{Conversation, LocalIdentity, SyncPolicy, TransportHandle};
use velours_net::{MessagePayload, Messaging, ReceiptBatch, SendError};
use velours_net::payload::PayloadContent;
use velours_shared::{
    AccountId, ConversationId, Destination, DeviceId, Message, MessageId, MessageKind,
    MessageMode, ReadPosition, ServerTimestamp,
};
use velours_store::{
    ConversationRecord, ConversationStore, MessageQuery, PositionRange, StoreError, UnreadRange,
};

pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "velours_client=debug,warn".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub const LOCAL: AccountId = AccountId([1u8; 32]);
pub const PEER: AccountId = AccountId([2u8; 32]);
pub const OTHER_PEER: AccountId = AccountId([3u8; 32]);

pub fn identity() -> LocalIdentity {
    LocalIdentity { account: LOCAL, device: DeviceId(1) }
}

/// Short debounce and job timeout so paused-clock tests stay fast.
pub fn test_policy() -> SyncPolicy {
    SyncPolicy {
        drift_debounce: Duration::from_secs(3),
        job_timeout: Duration::from_secs(30),
        ..SyncPolicy::default()
    }
}

pub fn incoming(conversation: ConversationId, ts: ServerTimestamp, sender: AccountId) -> Message {
    Message {
        id: MessageId::new(),
        conversation_id: conversation,
        sender: Some(sender),
        source_device: DeviceId(1),
        kind: MessageKind::Incoming,
        body: format!("message {ts}"),
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

pub fn position(
    conversation: ConversationId,
    device: u32,
    ts: ServerTimestamp,
) -> ReadPosition {
    ReadPosition {
        source_device: DeviceId(device),
        conversation_id: conversation,
        sender: Some(PEER),
        sent_at: ts,
        read_at: Utc::now(),
        max_server_timestamp: ts,
        message_kind: MessageKind::Incoming,
        max_notify_sequence_id: None,
    }
}

/// Let spawned workers and queued jobs drain on the current-thread runtime.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<Message>>,
    positions: Mutex<Vec<ReadPosition>>,
    records: Mutex<HashMap<ConversationId, ConversationRecord>>,
    pub unread_count_calls: AtomicUsize,
    pub unread_page_calls: AtomicUsize,
    pub position_query_calls: AtomicUsize,
    pub fail_unread_messages: AtomicBool,
    pub fail_read_positions: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_messages(&self, messages: Vec<Message>) {
        self.messages.lock().unwrap().extend(messages);
    }

    pub fn seed_positions(&self, positions: Vec<ReadPosition>) {
        self.positions.lock().unwrap().extend(positions);
    }

    pub fn saved_positions(&self) -> Vec<ReadPosition> {
        self.positions.lock().unwrap().clone()
    }

    pub fn saved_record(&self, id: &ConversationId) -> Option<ConversationRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn update_record(&self, record: ConversationRecord) {
        self.records.lock().unwrap().insert(record.id, record);
    }

    pub fn saved_message(&self, id: &MessageId) -> Option<Message> {
        self.messages.lock().unwrap().iter().find(|m| &m.id == id).cloned()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn messages_by_conversation(
        &self,
        id: &ConversationId,
        query: MessageQuery,
    ) -> Result<Vec<Message>, StoreError> {
        let before = query.before_server_timestamp.unwrap_or(i64::MAX);
        let mut page: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| {
                m.conversation_id == *id
                    && m.server_timestamp < before
                    && query.thread_id.map_or(true, |t| m.thread_id == Some(t))
            })
            .cloned()
            .collect();
        page.sort_by_key(|m| std::cmp::Reverse(m.server_timestamp));
        page.truncate(query.limit);
        Ok(page)
    }

    async fn unread_messages(
        &self,
        id: &ConversationId,
        range: UnreadRange,
    ) -> Result<Vec<Message>, StoreError> {
        self.unread_page_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_unread_messages.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected unread scan failure".into()));
        }
        let mut page: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| {
                m.conversation_id == *id
                    && m.kind == MessageKind::Incoming
                    && m.server_timestamp > range.after
                    && m.server_timestamp <= range.upto
            })
            .cloned()
            .collect();
        page.sort_by_key(|m| m.server_timestamp);
        page.truncate(range.limit);
        Ok(page)
    }

    async fn unread_message_count(
        &self,
        id: &ConversationId,
        after: ServerTimestamp,
        upto: ServerTimestamp,
    ) -> Result<u64, StoreError> {
        self.unread_count_calls.fetch_add(1, Ordering::SeqCst);
        let count = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| {
                m.conversation_id == *id
                    && m.kind == MessageKind::Incoming
                    && m.server_timestamp > after
                    && m.server_timestamp <= upto
            })
            .count();
        Ok(count as u64)
    }

    async fn save_message(&self, message: &Message, _force: bool) -> Result<(), StoreError> {
        let mut messages = self.messages.lock().unwrap();
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => messages.push(message.clone()),
        }
        Ok(())
    }

    async fn read_positions(
        &self,
        id: &ConversationId,
        range: PositionRange,
    ) -> Result<Vec<ReadPosition>, StoreError> {
        self.position_query_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_read_positions.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected position query failure".into()));
        }
        let mut page: Vec<ReadPosition> = self
            .positions
            .lock()
            .unwrap()
            .iter()
            .filter(|p| {
                if p.conversation_id != *id {
                    return false;
                }
                let ts = p.max_server_timestamp;
                let lower_ok = range.begin.map_or(true, |b| {
                    if range.include_begin { ts >= b } else { ts > b }
                });
                let upper_ok = range.end.map_or(true, |e| {
                    if range.include_end { ts <= e } else { ts < e }
                });
                lower_ok && upper_ok
            })
            .cloned()
            .collect();
        page.sort_by(|a, b| a.position_cmp(b));
        if let Some(limit) = range.limit {
            page.truncate(limit);
        }
        Ok(page)
    }

    async fn save_read_position(&self, position: &ReadPosition) -> Result<(), StoreError> {
        let mut positions = self.positions.lock().unwrap();
        match positions
            .iter_mut()
            .find(|p| p.unique_key() == position.unique_key())
        {
            Some(existing) => *existing = position.clone(),
            None => positions.push(position.clone()),
        }
        Ok(())
    }

    async fn update_conversation(&self, record: &ConversationRecord) -> Result<(), StoreError> {
        self.records.lock().unwrap().insert(record.id, record.clone());
        Ok(())
    }

    async fn conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Recording transport
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingMessaging {
    pub receipts: Mutex<Vec<ReceiptBatch>>,
    pub synced_batches: Mutex<Vec<Vec<ReadPosition>>>,
    pub payloads: Mutex<Vec<MessagePayload>>,
    pub self_payloads: Mutex<Vec<MessagePayload>>,
    pub refreshed: Mutex<Vec<AccountId>>,
    /// Scripted outcomes consumed by successive `send_read_receipts` calls:
    /// `Some(error)` fails the call, `None` lets it through.  An empty
    /// queue always succeeds.
    pub receipt_outcomes: Mutex<VecDeque<Option<SendError>>>,
    pub fail_send: AtomicBool,
    pub fail_build: AtomicBool,
}

impl RecordingMessaging {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn receipt_calls(&self) -> usize {
        self.receipts.lock().unwrap().len()
    }

    /// All receipt timestamps sent so far, flattened.
    pub fn receipt_timestamps(&self) -> Vec<i64> {
        self.receipts
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b.timestamps.iter().copied())
            .collect()
    }

    pub fn synced_positions(&self) -> Vec<ReadPosition> {
        self.synced_batches.lock().unwrap().iter().flatten().cloned().collect()
    }

    pub fn script_receipt_failure(&self, error: SendError) {
        self.receipt_outcomes.lock().unwrap().push_back(Some(error));
    }

    pub fn script_receipt_success(&self) {
        self.receipt_outcomes.lock().unwrap().push_back(None);
    }
}

#[async_trait]
impl Messaging for RecordingMessaging {
    async fn build_payload(
        &self,
        message: &Message,
        destination: &Destination,
    ) -> Result<MessagePayload, SendError> {
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(SendError::Payload("injected proto failure".into()));
        }
        let content = PayloadContent {
            message_id: message.id,
            conversation_id: message.conversation_id,
            body: message.body.clone(),
            sent_at: message.sent_at,
            expires_in: message.expires_in,
            mode: message.mode,
            collapse_id: message.collapse_id(),
            thread_id: message.thread_id,
        };
        Ok(match destination {
            Destination::Private(peer) => {
                MessagePayload::ToContact { recipient: *peer, content }
            }
            Destination::Group { id } => MessagePayload::ToGroup { group_id: *id, content },
            Destination::SelfDevices => MessagePayload::ToSelf { content },
        })
    }

    async fn send_payload(&self, payload: MessagePayload) -> Result<(), SendError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(SendError::Network("injected send failure".into()));
        }
        self.payloads.lock().unwrap().push(payload);
        Ok(())
    }

    async fn sync_to_self(&self, payload: MessagePayload) -> Result<(), SendError> {
        self.self_payloads.lock().unwrap().push(payload);
        Ok(())
    }

    async fn send_read_receipts(
        &self,
        _conversation: &ConversationId,
        batch: ReceiptBatch,
    ) -> Result<(), SendError> {
        if let Some(Some(error)) = self.receipt_outcomes.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.receipts.lock().unwrap().push(batch);
        Ok(())
    }

    async fn sync_read_positions(
        &self,
        _conversation: &ConversationId,
        positions: Vec<ReadPosition>,
    ) -> Result<(), SendError> {
        self.synced_batches.lock().unwrap().push(positions);
        Ok(())
    }

    async fn refresh_profile(&self, account: &AccountId) -> Result<(), SendError> {
        self.refreshed.lock().unwrap().push(*account);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Conversation builders
// ---------------------------------------------------------------------------

pub fn transport_with(messaging: Arc<RecordingMessaging>) -> TransportHandle {
    let handle = TransportHandle::new();
    handle.install(messaging);
    handle
}

pub fn private_conversation(
    store: Arc<MemoryStore>,
    transport: TransportHandle,
) -> Conversation {
    Conversation::new(
        ConversationId::new(),
        Destination::Private(PEER),
        identity(),
        test_policy(),
        store,
        transport,
    )
}
