//! v001 -- Initial schema creation.
//!
//! Creates the chat tables: `users`, `tokens`, `conversations`,
//! `conversation_participants`, `messages` and `message_status`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (owned by the auth service; the chat core only reads them)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    username   TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL                  -- RFC-3339, fixed precision
);

-- ----------------------------------------------------------------
-- Scoped bearer tokens (only the BLAKE3 hash is stored)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS tokens (
    hash    TEXT PRIMARY KEY NOT NULL,        -- hex BLAKE3 of the plaintext
    user_id TEXT NOT NULL,                    -- FK -> users(id)
    scope   TEXT NOT NULL,
    expiry  TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tokens_user_scope ON tokens(user_id, scope);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    type       TEXT NOT NULL CHECK (type IN ('direct', 'group')),
    name       TEXT,
    created_by TEXT,                          -- nullable FK -> users(id)
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS conversation_participants (
    conversation_id TEXT NOT NULL,            -- FK -> conversations(id)
    user_id         TEXT NOT NULL,            -- FK -> users(id)
    joined_at       TEXT NOT NULL,
    left_at         TEXT,                     -- NULL while active
    role            TEXT NOT NULL DEFAULT 'member' CHECK (role IN ('admin', 'member')),

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user ON conversation_participants(user_id);

-- ----------------------------------------------------------------
-- Messages (soft-deleted only, never removed)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                  TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id     TEXT NOT NULL,              -- FK -> conversations(id)
    sender_id           TEXT NOT NULL,              -- FK -> users(id)
    content             TEXT NOT NULL,
    message_type        TEXT NOT NULL DEFAULT 'text'
                        CHECK (message_type IN ('text', 'image', 'video', 'file')),
    media_url           TEXT,
    media_size          INTEGER,
    media_mime_type     TEXT,
    reply_to_message_id TEXT,                       -- nullable FK -> messages(id)
    created_at          TEXT NOT NULL,
    edited_at           TEXT,
    deleted_at          TEXT,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id),
    FOREIGN KEY (reply_to_message_id) REFERENCES messages(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
    ON messages(conversation_id, created_at DESC);

-- ----------------------------------------------------------------
-- Per-recipient delivery status
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_status (
    message_id TEXT NOT NULL,                 -- FK -> messages(id)
    user_id    TEXT NOT NULL,                 -- FK -> users(id)
    status     TEXT NOT NULL DEFAULT 'sent' CHECK (status IN ('sent', 'delivered', 'read')),
    timestamp  TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_message_status_user ON message_status(user_id, status);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
