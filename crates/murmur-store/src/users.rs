use rusqlite::params;

use murmur_shared::types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{now_ts, ts_col, uuid_col, User};

impl Database {
    /// Register a new user. Usernames are unique.
    pub fn create_user(&self, username: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(StoreError::Invalid("username must not be empty".into()));
        }

        let id = UserId::new();
        let (created_at, created_text) = now_ts();
        self.conn().execute(
            "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
            params![id.to_string(), username, created_text],
        )?;

        Ok(User {
            id,
            username: username.to_string(),
            created_at,
        })
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn user_exists(&self, id: UserId) -> Result<bool> {
        let found: i64 = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(found != 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(uuid_col(row, 0)?),
        username: row.get(1)?,
        created_at: ts_col(row, 2)?,
    })
}
