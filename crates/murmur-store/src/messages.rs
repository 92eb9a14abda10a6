use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use murmur_shared::types::{ConversationId, DeliveryStatus, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    enum_col, format_ts, now_ts, opt_ts_col, opt_uuid_col, ts_col, uuid_col, Message, NewMessage,
};

pub(crate) const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, message_type,
     media_url, media_size, media_mime_type, reply_to_message_id,
     created_at, edited_at, deleted_at";

impl Database {
    /// Insert a single message without status rows.
    pub fn create_message(&self, new: &NewMessage) -> Result<Message> {
        insert_message(self.conn(), new)
    }

    /// Insert one `sent` status row per recipient. Returns the number of rows
    /// written.
    pub fn create_statuses(&self, message_id: MessageId, recipients: &[UserId]) -> Result<usize> {
        let (_, now_text) = now_ts();
        insert_statuses(self.conn(), message_id, recipients, &now_text)
    }

    /// Insert a message and its recipients' `sent` status rows atomically, and
    /// bump the conversation's `updated_at`. Either everything is written or
    /// nothing is.
    pub fn create_message_with_statuses(
        &mut self,
        new: &NewMessage,
        recipients: &[UserId],
    ) -> Result<Message> {
        let tx = self.conn_mut().transaction()?;

        let message = insert_message(&tx, new)?;
        let created_text = format_ts(&message.created_at);
        insert_statuses(&tx, message.id, recipients, &created_text)?;
        tx.execute(
            "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
            params![new.conversation_id.to_string(), created_text],
        )?;

        tx.commit()?;
        Ok(message)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// A page of non-deleted messages, newest first. With `before`, only
    /// messages created strictly earlier are returned.
    pub fn messages_for_conversation(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let before = before.map(|ts| format_ts(&ts));
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE conversation_id = ?1
               AND deleted_at IS NULL
               AND (?2 IS NULL OR created_at < ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(
            params![conversation_id.to_string(), before, limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Soft-delete a message sent by `sender_id`. Returns the deletion time,
    /// or `None` when the message is not theirs or already deleted.
    pub fn soft_delete_message(
        &self,
        message_id: MessageId,
        sender_id: UserId,
    ) -> Result<Option<DateTime<Utc>>> {
        let (now, now_text) = now_ts();
        let affected = self.conn().execute(
            "UPDATE messages SET deleted_at = ?3
             WHERE id = ?1 AND sender_id = ?2 AND deleted_at IS NULL",
            params![message_id.to_string(), sender_id.to_string(), now_text],
        )?;
        Ok((affected > 0).then_some(now))
    }
}

fn insert_message(conn: &Connection, new: &NewMessage) -> Result<Message> {
    if new.content.trim().is_empty() && new.media_url.is_none() {
        return Err(StoreError::Invalid("message content is empty".into()));
    }

    if let Some(reply_to) = new.reply_to_message_id {
        let parent: Option<String> = conn
            .query_row(
                "SELECT conversation_id FROM messages WHERE id = ?1",
                params![reply_to.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if parent.as_deref() != Some(new.conversation_id.to_string().as_str()) {
            return Err(StoreError::Invalid(
                "reply target is not in this conversation".into(),
            ));
        }
    }

    let id = MessageId::new();
    let (created_at, created_text) = now_ts();
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, content, message_type,
                               media_url, media_size, media_mime_type, reply_to_message_id,
                               created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id.to_string(),
            new.conversation_id.to_string(),
            new.sender_id.to_string(),
            new.content,
            new.message_type.as_str(),
            new.media_url,
            new.media_size,
            new.media_mime_type,
            new.reply_to_message_id.map(|m| m.to_string()),
            created_text,
        ],
    )?;

    Ok(Message {
        id,
        conversation_id: new.conversation_id,
        sender_id: new.sender_id,
        content: new.content.clone(),
        message_type: new.message_type,
        media_url: new.media_url.clone(),
        media_size: new.media_size,
        media_mime_type: new.media_mime_type.clone(),
        reply_to_message_id: new.reply_to_message_id,
        created_at,
        edited_at: None,
        deleted_at: None,
    })
}

fn insert_statuses(
    conn: &Connection,
    message_id: MessageId,
    recipients: &[UserId],
    timestamp: &str,
) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO message_status (message_id, user_id, status, timestamp)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    let message_id = message_id.to_string();
    let mut written = 0;
    for user in recipients {
        written += stmt.execute(params![
            message_id,
            user.to_string(),
            DeliveryStatus::Sent.as_str(),
            timestamp
        ])?;
    }
    Ok(written)
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: MessageId(uuid_col(row, 0)?),
        conversation_id: ConversationId(uuid_col(row, 1)?),
        sender_id: UserId(uuid_col(row, 2)?),
        content: row.get(3)?,
        message_type: enum_col(row, 4)?,
        media_url: row.get(5)?,
        media_size: row.get(6)?,
        media_mime_type: row.get(7)?,
        reply_to_message_id: opt_uuid_col(row, 8)?.map(MessageId),
        created_at: ts_col(row, 9)?,
        edited_at: opt_ts_col(row, 10)?,
        deleted_at: opt_ts_col(row, 11)?,
    })
}

#[cfg(test)]
mod tests {
    use murmur_shared::types::MessageKind;

    use crate::test_util::{open_temp, users};

    use super::*;

    fn count(db: &Database, table: &str) -> i64 {
        db.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn message_and_statuses_are_written_together() {
        let (_dir, mut db) = open_temp();
        let [a, b, d] = users(&db, ["a", "b", "d"]);
        let (group, _) = db.create_group_conversation("c", a, &[b, d]).unwrap();

        let message = db
            .create_message_with_statuses(&NewMessage::text(group.id, a, "hi"), &[b, d])
            .unwrap();
        assert_eq!(message.message_type, MessageKind::Text);
        assert_eq!(count(&db, "messages"), 1);

        let statuses = db.statuses_for_message(message.id).unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.status == DeliveryStatus::Sent));
        assert!(statuses.iter().all(|s| s.user_id != a));

        let stored = db.get_message(message.id).unwrap();
        assert_eq!(stored, message);
    }

    #[test]
    fn failed_status_insert_rolls_back_the_message() {
        let (_dir, mut db) = open_temp();
        let [a, b] = users(&db, ["a", "b"]);
        let (direct, _) = db.find_or_create_direct_conversation(a, b).unwrap();

        // Unknown recipient violates the foreign key on message_status.
        let result = db.create_message_with_statuses(
            &NewMessage::text(direct.id, a, "hi"),
            &[b, UserId::new()],
        );
        assert!(result.is_err());
        assert_eq!(count(&db, "messages"), 0);
        assert_eq!(count(&db, "message_status"), 0);
    }

    #[test]
    fn create_statuses_writes_one_sent_row_per_recipient() {
        let (_dir, mut db) = open_temp();
        let [a, b, d] = users(&db, ["a", "b", "d"]);
        let (group, _) = db.create_group_conversation("c", a, &[b, d]).unwrap();

        let message = db.create_message(&NewMessage::text(group.id, a, "hi")).unwrap();
        assert!(db.statuses_for_message(message.id).unwrap().is_empty());

        assert_eq!(db.create_statuses(message.id, &[b, d]).unwrap(), 2);

        let statuses = db.statuses_for_message(message.id).unwrap();
        let recipients: Vec<_> = statuses.iter().map(|s| s.user_id).collect();
        assert_eq!(recipients, vec![b, d]);
        assert!(statuses.iter().all(|s| s.status == DeliveryStatus::Sent));
        assert_eq!(db.create_statuses(message.id, &[]).unwrap(), 0);
    }

    #[test]
    fn empty_message_is_invalid() {
        let (_dir, db) = open_temp();
        let [a] = users(&db, ["a"]);
        let err = db
            .create_message(&NewMessage::text(ConversationId::new(), a, "   "))
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn reply_must_stay_in_conversation() {
        let (_dir, mut db) = open_temp();
        let [a, b, c] = users(&db, ["a", "b", "c"]);
        let (ab, _) = db.find_or_create_direct_conversation(a, b).unwrap();
        let (ac, _) = db.find_or_create_direct_conversation(a, c).unwrap();

        let parent = db.create_message(&NewMessage::text(ab.id, a, "root")).unwrap();

        let mut reply = NewMessage::text(ab.id, b, "re");
        reply.reply_to_message_id = Some(parent.id);
        assert!(db.create_message(&reply).is_ok());

        let mut stray = NewMessage::text(ac.id, c, "re");
        stray.reply_to_message_id = Some(parent.id);
        assert!(matches!(db.create_message(&stray), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn history_is_newest_first_and_pages_with_before() {
        let (_dir, mut db) = open_temp();
        let [a, b] = users(&db, ["a", "b"]);
        let (direct, _) = db.find_or_create_direct_conversation(a, b).unwrap();

        let mut sent = Vec::new();
        for i in 0..5 {
            let text = format!("m{i}");
            sent.push(
                db.create_message_with_statuses(&NewMessage::text(direct.id, a, &text), &[b])
                    .unwrap(),
            );
        }

        let page = db.messages_for_conversation(direct.id, 2, None).unwrap();
        let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3"]);

        let older = db
            .messages_for_conversation(direct.id, 10, Some(page[1].created_at))
            .unwrap();
        let contents: Vec<_> = older.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m1", "m0"]);
    }

    #[test]
    fn soft_delete_is_sender_only_and_hides_from_history() {
        let (_dir, mut db) = open_temp();
        let [a, b] = users(&db, ["a", "b"]);
        let (direct, _) = db.find_or_create_direct_conversation(a, b).unwrap();
        let message = db
            .create_message_with_statuses(&NewMessage::text(direct.id, a, "oops"), &[b])
            .unwrap();

        assert_eq!(db.soft_delete_message(message.id, b).unwrap(), None);
        assert!(db.soft_delete_message(message.id, a).unwrap().is_some());
        assert_eq!(db.soft_delete_message(message.id, a).unwrap(), None);

        assert!(db.messages_for_conversation(direct.id, 50, None).unwrap().is_empty());
        // The row itself is kept.
        assert!(db.get_message(message.id).unwrap().deleted_at.is_some());
    }
}
