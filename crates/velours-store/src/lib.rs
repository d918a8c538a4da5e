//! # velours-store
//!
//! Local storage for the Velours conversation core, backed by SQLite.
//!
//! The crate exposes two layers: the abstract [`ConversationStore`]
//! data-access trait the core programs against, and the bundled SQLite
//! implementation (a synchronous [`Database`] handle with typed CRUD helpers
//! plus the [`SqliteStore`] async adapter).

pub mod access;
pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod positions;
pub mod sqlite;

mod error;

pub use access::{ConversationRecord, ConversationStore, MessageQuery, PositionRange, UnreadRange};
pub use database::Database;
pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;
