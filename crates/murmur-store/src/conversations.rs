use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use murmur_shared::types::{ConversationId, ConversationKind, MessageId, ParticipantRole, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    enum_col, now_ts, opt_ts_col, opt_uuid_col, ts_col, uuid_col, Conversation,
    ConversationSummary, Participant,
};

const CONVERSATION_COLUMNS: &str = "id, type, name, created_by, created_at, updated_at";

/// Key identifying the direct conversation between two users, independent of
/// argument order.
pub fn direct_key(a: UserId, b: UserId) -> String {
    let (a, b) = (a.to_string(), b.to_string());
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

impl Database {
    /// Return the direct conversation between `initiator` and `other`,
    /// creating it if it does not exist yet. The boolean is `true` when the
    /// conversation was created by this call.
    pub fn find_or_create_direct_conversation(
        &mut self,
        initiator: UserId,
        other: UserId,
    ) -> Result<(Conversation, bool)> {
        if initiator == other {
            return Err(StoreError::Invalid(
                "cannot open a direct conversation with yourself".into(),
            ));
        }

        let key = direct_key(initiator, other);
        let tx = self.conn_mut().transaction()?;

        if let Some(existing) = conversation_by_direct_key(&tx, &key)? {
            return Ok((existing, false));
        }

        let id = ConversationId::new();
        let (now, now_text) = now_ts();
        let inserted = tx.execute(
            "INSERT INTO conversations (id, type, name, created_by, created_at, updated_at, direct_key)
             VALUES (?1, 'direct', NULL, ?2, ?3, ?3, ?4)",
            params![id.to_string(), initiator.to_string(), now_text, key],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                // Another writer created the pair first; hand back theirs.
                drop(tx);
                let winner = conversation_by_direct_key(self.conn(), &key)?
                    .ok_or(StoreError::NotFound)?;
                return Ok((winner, false));
            }
            Err(other) => return Err(other.into()),
        }

        for user in [initiator, other] {
            insert_participant(&tx, id, user, ParticipantRole::Member, &now_text)?;
        }
        tx.commit()?;

        tracing::debug!(conversation = %id, "created direct conversation");

        Ok((
            Conversation {
                id,
                kind: ConversationKind::Direct,
                name: None,
                created_by: Some(initiator),
                created_at: now,
                updated_at: now,
            },
            true,
        ))
    }

    /// Create a group owned by `creator` (role admin). Duplicate ids and the
    /// creator are filtered out of `participant_ids`; at least one other
    /// participant must remain. Returns the conversation and every member id,
    /// creator first.
    pub fn create_group_conversation(
        &mut self,
        name: &str,
        creator: UserId,
        participant_ids: &[UserId],
    ) -> Result<(Conversation, Vec<UserId>)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("group name is required".into()));
        }

        let mut members = vec![creator];
        for id in participant_ids {
            if !members.contains(id) {
                members.push(*id);
            }
        }
        if members.len() < 2 {
            return Err(StoreError::Invalid(
                "group must have at least one other participant".into(),
            ));
        }

        for id in &members {
            if !self.user_exists(*id)? {
                return Err(StoreError::NotFound);
            }
        }

        let id = ConversationId::new();
        let (now, now_text) = now_ts();
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, type, name, created_by, created_at, updated_at)
             VALUES (?1, 'group', ?2, ?3, ?4, ?4)",
            params![id.to_string(), name, creator.to_string(), now_text],
        )?;
        for member in &members {
            let role = if *member == creator {
                ParticipantRole::Admin
            } else {
                ParticipantRole::Member
            };
            insert_participant(&tx, id, *member, role, &now_text)?;
        }
        tx.commit()?;

        tracing::debug!(conversation = %id, members = members.len(), "created group conversation");

        Ok((
            Conversation {
                id,
                kind: ConversationKind::Group,
                name: Some(name.to_string()),
                created_by: Some(creator),
                created_at: now,
                updated_at: now,
            },
            members,
        ))
    }

    /// Users currently in the conversation, in join order.
    pub fn active_participants(&self, conversation_id: ConversationId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM conversation_participants
             WHERE conversation_id = ?1 AND left_at IS NULL
             ORDER BY joined_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id.to_string()], |row| uuid_col(row, 0))?;

        let mut users = Vec::new();
        for row in rows {
            users.push(UserId(row?));
        }
        Ok(users)
    }

    /// Membership row of `user_id`, including one the user has left.
    pub fn participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Option<Participant>> {
        let found = self
            .conn()
            .query_row(
                "SELECT conversation_id, user_id, joined_at, left_at, role
                 FROM conversation_participants
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![conversation_id.to_string(), user_id.to_string()],
                |row| {
                    Ok(Participant {
                        conversation_id: ConversationId(uuid_col(row, 0)?),
                        user_id: UserId(uuid_col(row, 1)?),
                        joined_at: ts_col(row, 2)?,
                        left_at: opt_ts_col(row, 3)?,
                        role: enum_col(row, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    /// Mark the user as having left. Returns `false` if they were not an
    /// active participant.
    pub fn leave_conversation(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool> {
        let (_, now_text) = now_ts();
        let affected = self.conn().execute(
            "UPDATE conversation_participants SET left_at = ?3
             WHERE conversation_id = ?1 AND user_id = ?2 AND left_at IS NULL",
            params![conversation_id.to_string(), user_id.to_string(), now_text],
        )?;
        Ok(affected > 0)
    }

    /// Every conversation the user is active in, most recent activity first.
    /// Conversations without messages come last.
    pub fn conversations_for_user(&self, user_id: UserId) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.type, c.name, c.created_by, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM conversation_participants cp
                     WHERE cp.conversation_id = c.id AND cp.left_at IS NULL),
                    (SELECT m.id FROM messages m
                     WHERE m.conversation_id = c.id AND m.deleted_at IS NULL
                     ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1) AS last_id,
                    (SELECT MAX(m.created_at) FROM messages m
                     WHERE m.conversation_id = c.id AND m.deleted_at IS NULL) AS last_at,
                    (SELECT COUNT(*) FROM message_status ms
                     JOIN messages m ON m.id = ms.message_id
                     WHERE m.conversation_id = c.id AND m.deleted_at IS NULL
                       AND ms.user_id = ?1 AND ms.status != 'read')
             FROM conversations c
             JOIN conversation_participants me
               ON me.conversation_id = c.id AND me.user_id = ?1 AND me.left_at IS NULL
             ORDER BY last_at IS NULL, last_at DESC, c.created_at DESC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            let conversation = row_to_conversation(row)?;
            let participants: u32 = row.get(6)?;
            let last_id = opt_uuid_col(row, 7)?;
            let unread: u32 = row.get(9)?;
            Ok((conversation, participants, last_id, unread))
        })?;

        let mut raw = Vec::new();
        for row in rows {
            raw.push(row?);
        }
        drop(stmt);

        let mut summaries = Vec::with_capacity(raw.len());
        for (conversation, participant_count, last_id, unread_count) in raw {
            let last_message = match last_id {
                Some(id) => Some(self.get_message(MessageId(id))?),
                None => None,
            };
            summaries.push(ConversationSummary {
                conversation,
                participant_count,
                last_message,
                unread_count,
            });
        }
        Ok(summaries)
    }
}

fn insert_participant(
    conn: &Connection,
    conversation_id: ConversationId,
    user_id: UserId,
    role: ParticipantRole,
    joined_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO conversation_participants (conversation_id, user_id, joined_at, role)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            conversation_id.to_string(),
            user_id.to_string(),
            joined_at,
            role.as_str()
        ],
    )?;
    Ok(())
}

fn conversation_by_direct_key(conn: &Connection, key: &str) -> Result<Option<Conversation>> {
    let found = conn
        .query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE direct_key = ?1"),
            params![key],
            row_to_conversation,
        )
        .optional()?;
    Ok(found)
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: ConversationId(uuid_col(row, 0)?),
        kind: enum_col(row, 1)?,
        name: row.get(2)?,
        created_by: opt_uuid_col(row, 3)?.map(UserId),
        created_at: ts_col(row, 4)?,
        updated_at: ts_col(row, 5)?,
    })
}
