//! One function per inbound event kind. Handlers are the only place that
//! build outbound events in response to a client request.

use chrono::Utc;
use tracing::{debug, info};

use murmur_shared::constants::{DEFAULT_MESSAGE_PAGE, MAX_MESSAGE_PAGE};
use murmur_shared::protocol::{
    ConversationRef, ConversationsListPayload, CreateConversationPayload, GetMessagesPayload,
    MessageDeletedPayload, MessageDeliveredPayload, MessageReadPayload, MessageRef,
    MessagesListPayload, SendMessagePayload, ServerEvent, TypingPayload,
};
use murmur_shared::types::{ConversationKind, DeliveryStatus};
use murmur_store::StoreError;

use crate::connection::ClientContext;
use crate::coordinator::{require_member, Coordinator};
use crate::error::DispatchError;

pub async fn send_message(
    co: &Coordinator,
    ctx: &ClientContext,
    payload: SendMessagePayload,
) -> Result<(), DispatchError> {
    co.send_message(ctx.user_id, payload).await?;
    Ok(())
}

pub async fn create_conversation(
    co: &Coordinator,
    ctx: &ClientContext,
    payload: CreateConversationPayload,
) -> Result<(), DispatchError> {
    if payload.kind == ConversationKind::Direct {
        return Err(DispatchError::BadRequest(
            "use send_message for direct chats".to_string(),
        ));
    }
    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| DispatchError::BadRequest("group name is required".to_string()))?;

    let (conversation, members) = co
        .create_group(ctx.user_id, name, &payload.participant_ids)
        .await?;
    info!(
        conversation = %conversation.id,
        creator = %ctx.user_id,
        members = members.len(),
        "Group created"
    );
    Ok(())
}

pub async fn get_conversations(
    co: &Coordinator,
    ctx: &ClientContext,
) -> Result<(), DispatchError> {
    let summaries = co.with_store(|db| Ok(db.conversations_for_user(ctx.user_id)?))?;

    ctx.reply(ServerEvent::ConversationsList(ConversationsListPayload {
        conversations: summaries.into_iter().map(Into::into).collect(),
    }))
    .await;
    Ok(())
}

pub async fn get_messages(
    co: &Coordinator,
    ctx: &ClientContext,
    payload: GetMessagesPayload,
) -> Result<(), DispatchError> {
    let limit = match payload.limit {
        None | Some(0) => DEFAULT_MESSAGE_PAGE,
        Some(limit) => limit.min(MAX_MESSAGE_PAGE),
    };

    let messages = co.with_store(|db| {
        require_member(db, payload.conversation_id, ctx.user_id)?;
        Ok(db.messages_for_conversation(payload.conversation_id, limit, payload.before)?)
    })?;

    ctx.reply(ServerEvent::MessagesList(MessagesListPayload {
        conversation_id: payload.conversation_id,
        messages: messages.into_iter().map(Into::into).collect(),
    }))
    .await;
    Ok(())
}

pub async fn mark_as_read(
    co: &Coordinator,
    ctx: &ClientContext,
    target: ConversationRef,
) -> Result<(), DispatchError> {
    let conversation_id = target.conversation_id;
    let (changed, others) = co.with_store(|db| {
        require_member(db, conversation_id, ctx.user_id)?;
        let changed = db.mark_conversation_read(ctx.user_id, conversation_id)?;
        let mut others = db.active_participants(conversation_id)?;
        others.retain(|u| *u != ctx.user_id);
        Ok((changed, others))
    })?;

    if changed == 0 {
        return Ok(());
    }
    debug!(conversation = %conversation_id, user = %ctx.user_id, changed, "Marked read");

    let event = ServerEvent::MessageRead(MessageReadPayload {
        conversation_id,
        user_id: ctx.user_id,
        count: u32::try_from(changed).unwrap_or(u32::MAX),
        read_at: Utc::now(),
    });
    co.registry().broadcast_to_users(&event, &others).await;
    Ok(())
}

pub async fn mark_as_delivered(
    co: &Coordinator,
    ctx: &ClientContext,
    target: MessageRef,
) -> Result<(), DispatchError> {
    let outcome = co.with_store(|db| {
        let message = db.get_message(target.message_id).map_err(not_found("message"))?;
        require_member(db, message.conversation_id, ctx.user_id)?;
        let changed = db.update_status(message.id, ctx.user_id, DeliveryStatus::Delivered)?;
        Ok(changed.then_some(message))
    })?;

    let Some(message) = outcome else {
        return Ok(());
    };

    let event = ServerEvent::MessageDelivered(MessageDeliveredPayload {
        message_id: message.id,
        conversation_id: message.conversation_id,
        user_id: ctx.user_id,
        status: DeliveryStatus::Delivered,
        delivered_at: Utc::now(),
    });
    co.registry()
        .broadcast_to_users(&event, &[message.sender_id])
        .await;
    Ok(())
}

pub async fn delete_message(
    co: &Coordinator,
    ctx: &ClientContext,
    target: MessageRef,
) -> Result<(), DispatchError> {
    let (message, deleted_at, participants) = co.with_store(|db| {
        let message = db.get_message(target.message_id).map_err(not_found("message"))?;
        if message.sender_id != ctx.user_id {
            return Err(DispatchError::Forbidden(
                "only the sender can delete a message".to_string(),
            ));
        }
        let deleted_at = db
            .soft_delete_message(message.id, ctx.user_id)?
            .ok_or_else(|| DispatchError::NotFound("message already deleted".to_string()))?;
        let participants = db.active_participants(message.conversation_id)?;
        Ok((message, deleted_at, participants))
    })?;

    info!(message = %message.id, user = %ctx.user_id, "Message deleted");

    let event = ServerEvent::MessageDeleted(MessageDeletedPayload {
        message_id: message.id,
        conversation_id: message.conversation_id,
        deleted_at,
    });
    co.registry().broadcast_to_users(&event, &participants).await;
    Ok(())
}

pub async fn typing(
    co: &Coordinator,
    ctx: &ClientContext,
    target: ConversationRef,
    is_typing: bool,
) -> Result<(), DispatchError> {
    let others = co.other_participants(target.conversation_id, ctx.user_id)?;

    let event = ServerEvent::TypingIndicator(TypingPayload {
        conversation_id: target.conversation_id,
        user_id: ctx.user_id,
        is_typing,
    });
    co.registry().broadcast_to_users(&event, &others).await;
    Ok(())
}

fn not_found(what: &'static str) -> impl Fn(StoreError) -> DispatchError {
    move |e| match e {
        StoreError::NotFound => DispatchError::NotFound(format!("{what} not found")),
        other => other.into(),
    }
}
