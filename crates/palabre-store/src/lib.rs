//! # palabre-store
//!
//! SQLite persistence for the delivery core, backed by rusqlite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every persisted
//! entity: conversations, participants, messages, call sessions, and
//! notifications. Per-conversation message sequence numbers are allocated
//! inside a transaction so they stay contiguous under concurrent appends.

pub mod calls;
pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod read_state;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
