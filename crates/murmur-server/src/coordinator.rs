//! Couples the store with the registry.
//!
//! Writes happen under one hold of the store lock (and, where several rows
//! must agree, one SQLite transaction). Only after the lock is released are
//! outbound events pushed to the registry, so a broadcast never observes
//! uncommitted state and a slow connection never holds the store.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use murmur_shared::protocol::{
    ConversationCreatedPayload, MessageTarget, SendMessagePayload, ServerEvent,
};
use murmur_shared::types::{ConversationId, UserId};
use murmur_store::{Conversation, Database, Message, NewMessage, StoreError};

use crate::error::DispatchError;
use crate::hub::{BroadcastReport, Registry};

pub type SharedStore = Arc<Mutex<Database>>;

#[derive(Clone)]
pub struct Coordinator {
    store: SharedStore,
    registry: Arc<Registry>,
}

impl Coordinator {
    pub fn new(store: SharedStore, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run `f` with exclusive access to the database. Never call this across
    /// an `.await`.
    pub fn with_store<T>(
        &self,
        f: impl FnOnce(&mut Database) -> Result<T, DispatchError>,
    ) -> Result<T, DispatchError> {
        let mut db = self
            .store
            .lock()
            .map_err(|_| DispatchError::Store(StoreError::LockPoisoned))?;
        f(&mut *db)
    }

    /// Persist a message with one `sent` status per other active participant,
    /// then push `new_message` to every active participant, sender included.
    pub async fn send_message(
        &self,
        sender: UserId,
        payload: SendMessagePayload,
    ) -> Result<(Message, BroadcastReport), DispatchError> {
        let target = payload.target()?;

        let (message, participants) = self.with_store(|db| {
            let conversation_id = resolve_target(db, sender, target)?;

            let participants = db.active_participants(conversation_id)?;
            let recipients: Vec<UserId> = participants
                .iter()
                .copied()
                .filter(|user| *user != sender)
                .collect();

            let new = NewMessage {
                conversation_id,
                sender_id: sender,
                content: payload.content,
                message_type: payload.message_type,
                media_url: payload.media_url,
                media_size: payload.media_size,
                media_mime_type: payload.media_mime_type,
                reply_to_message_id: payload.reply_to_message_id,
            };
            let message = db.create_message_with_statuses(&new, &recipients)?;
            Ok((message, participants))
        })?;

        info!(
            message = %message.id,
            conversation = %message.conversation_id,
            sender = %sender,
            recipients = participants.len().saturating_sub(1),
            "Message stored"
        );

        let event = ServerEvent::NewMessage(message.clone().into());
        let report = self.registry.broadcast_to_users(&event, &participants).await;
        Ok((message, report))
    }

    /// Create a group and announce it to all of its members.
    pub async fn create_group(
        &self,
        creator: UserId,
        name: &str,
        participant_ids: &[UserId],
    ) -> Result<(Conversation, Vec<UserId>), DispatchError> {
        let (conversation, members) = self.with_store(|db| {
            db.create_group_conversation(name, creator, participant_ids)
                .map_err(|e| match e {
                    StoreError::NotFound => {
                        DispatchError::NotFound("unknown participant".to_string())
                    }
                    other => other.into(),
                })
        })?;

        let event = ServerEvent::ConversationCreated(ConversationCreatedPayload {
            conversation: conversation.clone().into(),
            participant_ids: members.clone(),
        });
        self.registry.broadcast_to_users(&event, &members).await;

        Ok((conversation, members))
    }

    /// Active participants other than `user_id`, after checking that
    /// `user_id` is one of them.
    pub fn other_participants(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Vec<UserId>, DispatchError> {
        self.with_store(|db| {
            require_member(db, conversation_id, user_id)?;
            let mut others = db.active_participants(conversation_id)?;
            others.retain(|u| *u != user_id);
            Ok(others)
        })
    }
}

/// Fail with `Forbidden` unless `user_id` is an active participant.
pub fn require_member(
    db: &Database,
    conversation_id: ConversationId,
    user_id: UserId,
) -> Result<(), DispatchError> {
    let member = db.participant(conversation_id, user_id)?;
    if member.is_some_and(|p| p.is_active()) {
        Ok(())
    } else {
        Err(DispatchError::Forbidden(
            "not a participant of this conversation".to_string(),
        ))
    }
}

fn resolve_target(
    db: &mut Database,
    sender: UserId,
    target: MessageTarget,
) -> Result<ConversationId, DispatchError> {
    match target {
        MessageTarget::Direct(recipient) => {
            if recipient == sender {
                return Err(DispatchError::BadRequest(
                    "cannot send a message to yourself".to_string(),
                ));
            }
            if !db.user_exists(recipient)? {
                return Err(DispatchError::NotFound("recipient not found".to_string()));
            }
            let (conversation, created) =
                db.find_or_create_direct_conversation(sender, recipient)?;
            if created {
                debug!(conversation = %conversation.id, "Opened direct conversation");
            } else {
                require_member(db, conversation.id, sender)?;
            }
            Ok(conversation.id)
        }
        MessageTarget::Conversation(conversation_id) => {
            require_member(db, conversation_id, sender)?;
            Ok(conversation_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use murmur_shared::types::{DeliveryStatus, MessageId, MessageKind};

    use crate::test_support::Fixture;

    use super::*;

    fn text_to(conversation_id: ConversationId, content: &str) -> SendMessagePayload {
        SendMessagePayload {
            conversation_id: Some(conversation_id),
            recipient_id: None,
            content: content.to_string(),
            message_type: MessageKind::Text,
            reply_to_message_id: None,
            media_url: None,
            media_size: None,
            media_mime_type: None,
        }
    }

    fn direct_to(recipient: UserId, content: &str) -> SendMessagePayload {
        SendMessagePayload {
            conversation_id: None,
            recipient_id: Some(recipient),
            ..text_to(ConversationId::new(), content)
        }
    }

    fn count(fx: &Fixture, table: &str) -> i64 {
        fx.store
            .lock()
            .unwrap()
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn group_send_fans_out_to_all_members() {
        let fx = Fixture::new();
        let [a, b, d] = fx.users(["a", "b", "d"]);
        let group = fx.group("c", a, &[b, d]);

        let (_a_ctx, mut a_rx) = fx.connect(a).await;
        let (_a2_ctx, mut a2_rx) = fx.connect(a).await;
        let (_b_ctx, mut b_rx) = fx.connect(b).await;
        let (_d_ctx, mut d_rx) = fx.connect(d).await;

        let (message, report) = fx
            .coordinator
            .send_message(a, text_to(group, "hi"))
            .await
            .unwrap();
        assert_eq!(message.content, "hi");
        assert_eq!(report.delivered, 4);

        let statuses = fx.store.lock().unwrap().statuses_for_message(message.id).unwrap();
        let mut recipients: Vec<_> = statuses.iter().map(|s| s.user_id).collect();
        recipients.sort();
        let mut expected = vec![b, d];
        expected.sort();
        assert_eq!(recipients, expected);
        assert!(statuses.iter().all(|s| s.status == DeliveryStatus::Sent));

        for rx in [&mut a_rx, &mut a2_rx, &mut b_rx, &mut d_rx] {
            match rx.try_recv().unwrap() {
                ServerEvent::NewMessage(payload) => assert_eq!(payload.id, message.id),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn non_member_send_is_forbidden_without_writes() {
        let fx = Fixture::new();
        let [a, b, outsider] = fx.users(["a", "b", "outsider"]);
        let group = fx.group("c", a, &[b]);

        let err = fx
            .coordinator
            .send_message(outsider, text_to(group, "let me in"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Forbidden(_)));

        fx.store.lock().unwrap().leave_conversation(group, b).unwrap();
        let err = fx
            .coordinator
            .send_message(b, text_to(group, "still here?"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Forbidden(_)));

        assert_eq!(count(&fx, "messages"), 0);
        assert_eq!(count(&fx, "message_status"), 0);
    }

    #[tokio::test]
    async fn failed_persist_broadcasts_nothing() {
        let fx = Fixture::new();
        let [a, b] = fx.users(["a", "b"]);
        let group = fx.group("g", a, &[b]);
        let (_a_ctx, mut a_rx) = fx.connect(a).await;
        let (_b_ctx, mut b_rx) = fx.connect(b).await;

        let mut stray_reply = text_to(group, "re");
        stray_reply.reply_to_message_id = Some(MessageId::new());
        let err = fx.coordinator.send_message(a, stray_reply).await.unwrap_err();
        assert!(matches!(err, DispatchError::BadRequest(_)));

        let err = fx
            .coordinator
            .send_message(a, text_to(group, "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::BadRequest(_)));

        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
        assert_eq!(count(&fx, "messages"), 0);
        assert_eq!(count(&fx, "message_status"), 0);
    }

    #[tokio::test]
    async fn direct_sends_reuse_one_conversation() {
        let fx = Fixture::new();
        let [a, b] = fx.users(["a", "b"]);

        let (first, _) = fx.coordinator.send_message(a, direct_to(b, "hi")).await.unwrap();
        let (reply, _) = fx.coordinator.send_message(b, direct_to(a, "yo")).await.unwrap();
        assert_eq!(first.conversation_id, reply.conversation_id);
        assert_eq!(count(&fx, "conversations"), 1);
        assert_eq!(count(&fx, "message_status"), 2);
    }

    #[tokio::test]
    async fn direct_send_rejects_self_and_unknown_recipients() {
        let fx = Fixture::new();
        let [a] = fx.users(["a"]);

        let err = fx.coordinator.send_message(a, direct_to(a, "me")).await.unwrap_err();
        assert!(matches!(err, DispatchError::BadRequest(_)));

        let err = fx
            .coordinator
            .send_message(a, direct_to(UserId::new(), "hello?"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
        assert_eq!(count(&fx, "conversations"), 0);
    }

    #[tokio::test]
    async fn offline_members_still_get_status_rows() {
        let fx = Fixture::new();
        let [a, b] = fx.users(["a", "b"]);
        let group = fx.group("g", a, &[b]);

        let (message, report) = fx
            .coordinator
            .send_message(a, text_to(group, "anyone?"))
            .await
            .unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(
            fx.store.lock().unwrap().status_of(message.id, b).unwrap(),
            Some(DeliveryStatus::Sent)
        );
    }

    #[tokio::test]
    async fn group_creation_is_announced_to_members() {
        let fx = Fixture::new();
        let [a, b, c] = fx.users(["a", "b", "c"]);
        let (_b_ctx, mut b_rx) = fx.connect(b).await;
        let (_c_ctx, mut c_rx) = fx.connect(c).await;

        let (conversation, members) = fx.coordinator.create_group(a, "team", &[b]).await.unwrap();
        assert_eq!(members, vec![a, b]);

        match b_rx.try_recv().unwrap() {
            ServerEvent::ConversationCreated(payload) => {
                assert_eq!(payload.conversation.id, conversation.id);
                assert_eq!(payload.participant_ids, vec![a, b]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(c_rx.try_recv().is_err());
    }
}
