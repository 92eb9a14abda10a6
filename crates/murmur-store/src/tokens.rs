//! Scoped bearer tokens.
//!
//! The plaintext is handed to the client once; only its BLAKE3 hash is
//! stored, so a leaked database does not leak usable tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;
use rusqlite::{params, OptionalExtension};

use murmur_shared::types::UserId;

use crate::database::Database;
use crate::error::Result;
use crate::models::{format_ts, uuid_col};

/// Hex-encoded BLAKE3 digest of a token plaintext.
pub fn hash_token(plaintext: &str) -> String {
    hex::encode(blake3::hash(plaintext.as_bytes()).as_bytes())
}

impl Database {
    /// Issue a token for `user_id` valid for `ttl` and return its plaintext.
    pub fn create_token(&self, user_id: UserId, ttl: Duration, scope: &str) -> Result<String> {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let plaintext = URL_SAFE_NO_PAD.encode(raw);

        let expiry = Utc::now() + ttl;
        self.conn().execute(
            "INSERT INTO tokens (hash, user_id, scope, expiry) VALUES (?1, ?2, ?3, ?4)",
            params![
                hash_token(&plaintext),
                user_id.to_string(),
                scope,
                format_ts(&expiry)
            ],
        )?;

        Ok(plaintext)
    }

    /// Resolve a plaintext token to its user. Unknown, expired and
    /// wrong-scope tokens all resolve to `None`.
    pub fn user_for_token(&self, scope: &str, plaintext: &str) -> Result<Option<UserId>> {
        let now = format_ts(&Utc::now());
        let user = self
            .conn()
            .query_row(
                "SELECT user_id FROM tokens
                 WHERE hash = ?1 AND scope = ?2 AND expiry > ?3",
                params![hash_token(plaintext), scope, now],
                |row| uuid_col(row, 0),
            )
            .optional()?;
        Ok(user.map(UserId))
    }

    /// Remove expired tokens; returns how many were deleted.
    pub fn purge_expired_tokens(&self) -> Result<usize> {
        let now = format_ts(&Utc::now());
        let removed = self
            .conn()
            .execute("DELETE FROM tokens WHERE expiry <= ?1", params![now])?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use murmur_shared::constants::SOCKET_TOKEN_SCOPE;

    use crate::test_util::open_temp;

    use super::*;

    #[test]
    fn token_resolves_to_its_user() {
        let (_dir, db) = open_temp();
        let alice = db.create_user("alice").unwrap();

        let token = db
            .create_token(alice.id, Duration::hours(1), SOCKET_TOKEN_SCOPE)
            .unwrap();

        assert_eq!(
            db.user_for_token(SOCKET_TOKEN_SCOPE, &token).unwrap(),
            Some(alice.id)
        );
        assert_eq!(db.user_for_token("activation", &token).unwrap(), None);
        assert_eq!(db.user_for_token(SOCKET_TOKEN_SCOPE, "nope").unwrap(), None);
    }

    #[test]
    fn expired_token_is_rejected_and_purged() {
        let (_dir, db) = open_temp();
        let alice = db.create_user("alice").unwrap();

        let token = db
            .create_token(alice.id, Duration::seconds(-5), SOCKET_TOKEN_SCOPE)
            .unwrap();

        assert_eq!(db.user_for_token(SOCKET_TOKEN_SCOPE, &token).unwrap(), None);
        assert_eq!(db.purge_expired_tokens().unwrap(), 1);
    }

    #[test]
    fn only_the_hash_is_stored() {
        let (_dir, db) = open_temp();
        let alice = db.create_user("alice").unwrap();
        let token = db
            .create_token(alice.id, Duration::hours(1), SOCKET_TOKEN_SCOPE)
            .unwrap();

        let stored: String = db
            .conn()
            .query_row("SELECT hash FROM tokens", [], |row| row.get(0))
            .unwrap();
        assert_ne!(stored, token);
        assert_eq!(stored, hash_token(&token));
        assert_eq!(stored.len(), 64);
    }
}
