//! # chronicle-store
//!
//! Local SQLite storage backing the history-archive subsystem: the raw
//! message history archives are built from, and per-community archive
//! bookkeeping (the resumption cursor and the archive IDs seen or imported).
//!
//! The crate exposes a synchronous `Database` handle wrapping a
//! `rusqlite::Connection` with typed helpers for each table.

pub mod archive_state;
pub mod database;
pub mod messages;
pub mod migrations;

mod error;

pub use database::{Database, SharedDatabase};
pub use error::StoreError;
