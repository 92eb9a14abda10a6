//! # murmur-store
//!
//! Persistent storage for the murmur chat server, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for users, socket tokens,
//! conversations, messages and per-recipient delivery status. Operations that
//! must be atomic take `&mut self` and run inside a single transaction.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod statuses;
pub mod tokens;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;

#[cfg(test)]
pub(crate) mod test_util {
    use murmur_shared::types::UserId;
    use tempfile::TempDir;

    use crate::Database;

    pub fn open_temp() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    pub fn users<const N: usize>(db: &Database, names: [&str; N]) -> [UserId; N] {
        names.map(|name| db.create_user(name).unwrap().id)
    }
}
