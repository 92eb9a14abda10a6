//! The chat database handle.
//!
//! The server keeps exactly one [`Database`] behind a mutex. Operations that
//! touch several rows at once take `&mut self` and open a SQLite transaction
//! on the connection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at [`Database::default_path`].
    pub fn new() -> Result<Self> {
        Self::open_at(&Self::default_path()?)
    }

    /// `murmur.db` inside the platform data directory, e.g.
    /// `~/.local/share/murmur/murmur.db` on Linux.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("chat", "murmur", "murmur").ok_or(StoreError::NoDataDir)?;
        Ok(dirs.data_dir().join("murmur.db"))
    }

    /// Open or create the database file at `path`, creating missing parent
    /// directories, and bring the schema up to date.
    pub fn open_at(path: &Path) -> Result<Self> {
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)?,
            _ => {}
        }

        tracing::info!(path = %path.display(), "opening chat database");

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access, needed to start a transaction.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// File backing this database; `None` for in-memory connections.
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reopening_keeps_the_schema() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("chat.db");

        let db = Database::open_at(&file).unwrap();
        db.create_user("alice").unwrap();
        assert!(db.path().is_some());
        drop(db);

        let db = Database::open_at(&file).unwrap();
        assert!(db.create_user("alice").is_err());
    }

    #[test]
    fn missing_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a").join("b").join("chat.db");

        Database::open_at(&file).unwrap();
        assert!(file.exists());
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("chat.db")).unwrap();

        let enabled: i64 = db
            .conn()
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
