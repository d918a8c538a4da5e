//! # velours-shared
//!
//! Domain types shared by every Velours crate: account / conversation /
//! device identifiers, the message and read-position records, and the
//! tuning constants for the read-state synchronisation engine.

pub mod constants;
pub mod message;
pub mod read_position;
pub mod types;

pub use message::{DeliveryError, DeliveryErrorKind, Message, SendState};
pub use read_position::ReadPosition;
pub use types::{
    AccountId, ConversationId, Destination, DeviceId, MessageId, MessageKind, MessageMode,
    ServerTimestamp,
};
