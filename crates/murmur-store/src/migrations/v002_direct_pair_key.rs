//! v002 -- Unique key for direct conversations.
//!
//! A direct conversation is identified by the unordered pair of its two
//! participants. The key is `"<lower uuid>:<higher uuid>"` and is unique, so
//! two concurrent first contacts cannot create two conversations.

use rusqlite::Connection;

const UP_SQL: &str = r#"
ALTER TABLE conversations ADD COLUMN direct_key TEXT;

-- Backfill direct conversations created before the key existed.
UPDATE conversations
SET direct_key = (
    SELECT MIN(user_id) || ':' || MAX(user_id)
    FROM conversation_participants
    WHERE conversation_id = conversations.id
)
WHERE type = 'direct';

CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_direct_key
    ON conversations(direct_key)
    WHERE direct_key IS NOT NULL;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
