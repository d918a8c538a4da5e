//! # velours-client
//!
//! The conversation core of the Velours desktop client: read-position and
//! unread-count reconciliation, per-conversation serialized job execution,
//! read-receipt and device-sync catch-up, and the outbound message
//! pipeline.  The storage engine and the encrypted transport are abstract
//! collaborators (`velours-store`, `velours-net`); the UI observes through
//! typed change events.

pub mod coalesce;
pub mod config;
pub mod conversation;
pub mod events;
pub mod job_queue;
pub mod outbound;
pub mod positions;
pub mod read_sync;
pub mod registry;
pub mod transport;
pub mod unread;
pub mod window;

pub use config::{LocalIdentity, SyncPolicy};
pub use conversation::{Conversation, ConversationSnapshot};
pub use events::{ChangeReason, ConversationEvent};
pub use job_queue::JobQueue;
pub use outbound::{MessageDraft, OutboundError, Reply};
pub use read_sync::MarkReadOptions;
pub use registry::Conversations;
pub use transport::TransportHandle;
