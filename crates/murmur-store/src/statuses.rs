//! Per-recipient delivery status.
//!
//! Status only ever moves forward (`sent` -> `delivered` -> `read`); the
//! rank comparison lives in the UPDATE statements so a late `delivered`
//! can never overwrite a `read`.

use rusqlite::params;

use murmur_shared::types::{ConversationId, DeliveryStatus, MessageId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{enum_col, now_ts, ts_col, uuid_col, MessageStatus};

const STATUS_RANK_SQL: &str = "CASE status WHEN 'sent' THEN 0 WHEN 'delivered' THEN 1 WHEN 'read' THEN 2 END";

impl Database {
    /// Advance the status of one message for one recipient. Returns `false`
    /// when no row exists or the stored status is already at or beyond
    /// `status`.
    pub fn update_status(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: DeliveryStatus,
    ) -> Result<bool> {
        let (_, now_text) = now_ts();
        let affected = self.conn().execute(
            &format!(
                "UPDATE message_status SET status = ?3, timestamp = ?4
                 WHERE message_id = ?1 AND user_id = ?2 AND {STATUS_RANK_SQL} < ?5"
            ),
            params![
                message_id.to_string(),
                user_id.to_string(),
                status.as_str(),
                now_text,
                status.rank()
            ],
        )?;
        Ok(affected > 0)
    }

    /// Mark every unread status row of `user_id` in the conversation as
    /// `read` in a single statement. Returns the number of rows changed.
    pub fn mark_conversation_read(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<usize> {
        let (_, now_text) = now_ts();
        let affected = self.conn().execute(
            "UPDATE message_status SET status = 'read', timestamp = ?3
             WHERE user_id = ?1
               AND status != 'read'
               AND message_id IN (SELECT id FROM messages WHERE conversation_id = ?2)",
            params![user_id.to_string(), conversation_id.to_string(), now_text],
        )?;
        Ok(affected)
    }

    pub fn statuses_for_message(&self, message_id: MessageId) -> Result<Vec<MessageStatus>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, user_id, status, timestamp
             FROM message_status
             WHERE message_id = ?1
             ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            Ok(MessageStatus {
                message_id: MessageId(uuid_col(row, 0)?),
                user_id: UserId(uuid_col(row, 1)?),
                status: enum_col(row, 2)?,
                timestamp: ts_col(row, 3)?,
            })
        })?;

        let mut statuses = Vec::new();
        for row in rows {
            statuses.push(row?);
        }
        Ok(statuses)
    }

    pub fn status_of(&self, message_id: MessageId, user_id: UserId) -> Result<Option<DeliveryStatus>> {
        Ok(self
            .statuses_for_message(message_id)?
            .into_iter()
            .find(|s| s.user_id == user_id)
            .map(|s| s.status))
    }
}

#[cfg(test)]
mod tests {
    use crate::models::NewMessage;
    use crate::test_util::{open_temp, users};

    use super::*;

    #[test]
    fn status_never_regresses() {
        let (_dir, mut db) = open_temp();
        let [a, b] = users(&db, ["a", "b"]);
        let (direct, _) = db.find_or_create_direct_conversation(a, b).unwrap();
        let message = db
            .create_message_with_statuses(&NewMessage::text(direct.id, a, "hi"), &[b])
            .unwrap();

        assert!(db.update_status(message.id, b, DeliveryStatus::Read).unwrap());
        assert!(!db.update_status(message.id, b, DeliveryStatus::Delivered).unwrap());
        assert!(!db.update_status(message.id, b, DeliveryStatus::Read).unwrap());
        assert_eq!(db.status_of(message.id, b).unwrap(), Some(DeliveryStatus::Read));
    }

    #[test]
    fn sql_rank_matches_status_rank() {
        let (_dir, db) = open_temp();
        for status in [DeliveryStatus::Sent, DeliveryStatus::Delivered, DeliveryStatus::Read] {
            let rank: i64 = db
                .conn()
                .query_row(
                    &format!("SELECT {STATUS_RANK_SQL} FROM (SELECT ?1 AS status)"),
                    params![status.as_str()],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(rank, status.rank(), "{status:?}");
        }
    }

    #[test]
    fn delivered_then_read_advances() {
        let (_dir, mut db) = open_temp();
        let [a, b] = users(&db, ["a", "b"]);
        let (direct, _) = db.find_or_create_direct_conversation(a, b).unwrap();
        let message = db
            .create_message_with_statuses(&NewMessage::text(direct.id, a, "hi"), &[b])
            .unwrap();

        assert!(db.update_status(message.id, b, DeliveryStatus::Delivered).unwrap());
        assert_eq!(
            db.status_of(message.id, b).unwrap(),
            Some(DeliveryStatus::Delivered)
        );
        assert!(db.update_status(message.id, b, DeliveryStatus::Read).unwrap());

        // The sender has no status row of their own.
        assert!(!db.update_status(message.id, a, DeliveryStatus::Read).unwrap());
    }

    #[test]
    fn mark_read_touches_only_unread_rows_of_the_user() {
        let (_dir, mut db) = open_temp();
        let [a, b, c] = users(&db, ["a", "b", "c"]);
        let (group, _) = db.create_group_conversation("g", a, &[b, c]).unwrap();

        let first = db
            .create_message_with_statuses(&NewMessage::text(group.id, a, "1"), &[b, c])
            .unwrap();
        db.create_message_with_statuses(&NewMessage::text(group.id, a, "2"), &[b, c])
            .unwrap();
        db.update_status(first.id, b, DeliveryStatus::Read).unwrap();

        assert_eq!(db.mark_conversation_read(b, group.id).unwrap(), 1);
        assert_eq!(db.mark_conversation_read(b, group.id).unwrap(), 0);
        assert_eq!(db.status_of(first.id, c).unwrap(), Some(DeliveryStatus::Sent));
    }
}
