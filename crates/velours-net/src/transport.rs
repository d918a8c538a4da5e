//! The `Messaging` trait: everything the conversation core asks of the
//! encrypted transport.
//!
//! Implementations own session management, encryption, and the actual wire
//! formats.  The core only sequences the calls and interprets the typed
//! errors (identity mismatch vs generic network failure).

use async_trait::async_trait;

use velours_shared::{AccountId, ConversationId, Destination, Message, ReadPosition};

use crate::error::SendError;
use crate::payload::{MessagePayload, ReceiptBatch};

#[async_trait]
pub trait Messaging: Send + Sync {
    /// Construct the wire payload for `message` bound for `destination`.
    ///
    /// Each destination kind has its own construction path; a failure here
    /// is reported per-recipient on the message, never thrown to the UI.
    async fn build_payload(
        &self,
        message: &Message,
        destination: &Destination,
    ) -> Result<MessagePayload, SendError>;

    /// Transmit a constructed payload to its recipients.
    async fn send_payload(&self, payload: MessagePayload) -> Result<(), SendError>;

    /// Deliver a self-destined payload as a sync to our own linked devices
    /// only (no recipient delivery).
    async fn sync_to_self(&self, payload: MessagePayload) -> Result<(), SendError>;

    /// Send one grouped batch of read receipts to a message author.
    async fn send_read_receipts(
        &self,
        conversation: &ConversationId,
        batch: ReceiptBatch,
    ) -> Result<(), SendError>;

    /// Sync a batch of our own read positions to our other linked devices.
    async fn sync_read_positions(
        &self,
        conversation: &ConversationId,
        positions: Vec<ReadPosition>,
    ) -> Result<(), SendError>;

    /// Refresh our view of a peer's identity after a key mismatch, so the
    /// next send can be retried against current keys.
    async fn refresh_profile(&self, account: &AccountId) -> Result<(), SendError>;
}
