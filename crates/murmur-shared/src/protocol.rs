//! Wire protocol spoken over a chat WebSocket.
//!
//! Every frame is a JSON envelope `{"type": "...", "payload": {...}}`.
//! Inbound frames are decoded in two steps: the envelope first, then the
//! `type` is matched against the closed set of [`InboundKind`]s and only
//! then is the payload parsed into its concrete shape. Outbound frames are
//! produced from the [`ServerEvent`] sum, which serializes to the same
//! envelope.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtocolError;
use crate::types::{
    ConversationId, ConversationKind, DeliveryStatus, MessageId, MessageKind, UserId,
};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Untyped `{type, payload}` unit as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ---------------------------------------------------------------------------
// Inbound (client -> server)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
    SendMessage,
    CreateConversation,
    GetConversations,
    GetMessages,
    MarkAsRead,
    MarkAsDelivered,
    DeleteMessage,
    StartTyping,
    StopTyping,
}

impl InboundKind {
    pub const ALL: [InboundKind; 9] = [
        Self::SendMessage,
        Self::CreateConversation,
        Self::GetConversations,
        Self::GetMessages,
        Self::MarkAsRead,
        Self::MarkAsDelivered,
        Self::DeleteMessage,
        Self::StartTyping,
        Self::StopTyping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::CreateConversation => "create_conversation",
            Self::GetConversations => "get_conversations",
            Self::GetMessages => "get_messages",
            Self::MarkAsRead => "mark_as_read",
            Self::MarkAsDelivered => "mark_as_delivered",
            Self::DeleteMessage => "delete_message",
            Self::StartTyping => "start_typing",
            Self::StopTyping => "stop_typing",
        }
    }
}

impl FromStr for InboundKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnsupportedEvent(s.to_string()))
    }
}

impl std::fmt::Display for InboundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    SendMessage(SendMessagePayload),
    CreateConversation(CreateConversationPayload),
    GetConversations,
    GetMessages(GetMessagesPayload),
    MarkAsRead(ConversationRef),
    MarkAsDelivered(MessageRef),
    DeleteMessage(MessageRef),
    StartTyping(ConversationRef),
    StopTyping(ConversationRef),
}

impl ClientEvent {
    pub fn decode(event: Event) -> Result<Self, ProtocolError> {
        let kind: InboundKind = event.kind.parse()?;
        let payload = event.payload;

        Ok(match kind {
            InboundKind::SendMessage => Self::SendMessage(payload_as(kind, payload)?),
            InboundKind::CreateConversation => {
                Self::CreateConversation(payload_as(kind, payload)?)
            }
            InboundKind::GetConversations => Self::GetConversations,
            InboundKind::GetMessages => Self::GetMessages(payload_as(kind, payload)?),
            InboundKind::MarkAsRead => Self::MarkAsRead(payload_as(kind, payload)?),
            InboundKind::MarkAsDelivered => Self::MarkAsDelivered(payload_as(kind, payload)?),
            InboundKind::DeleteMessage => Self::DeleteMessage(payload_as(kind, payload)?),
            InboundKind::StartTyping => Self::StartTyping(payload_as(kind, payload)?),
            InboundKind::StopTyping => Self::StopTyping(payload_as(kind, payload)?),
        })
    }

    /// Decode straight from a text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Self::decode(Event::from_json(text)?)
    }

    pub fn kind(&self) -> InboundKind {
        match self {
            Self::SendMessage(_) => InboundKind::SendMessage,
            Self::CreateConversation(_) => InboundKind::CreateConversation,
            Self::GetConversations => InboundKind::GetConversations,
            Self::GetMessages(_) => InboundKind::GetMessages,
            Self::MarkAsRead(_) => InboundKind::MarkAsRead,
            Self::MarkAsDelivered(_) => InboundKind::MarkAsDelivered,
            Self::DeleteMessage(_) => InboundKind::DeleteMessage,
            Self::StartTyping(_) => InboundKind::StartTyping,
            Self::StopTyping(_) => InboundKind::StopTyping,
        }
    }
}

fn payload_as<T: DeserializeOwned>(
    kind: InboundKind,
    payload: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        kind: kind.as_str().to_string(),
        reason: e.to_string(),
    })
}

/// Where a `send_message` is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    /// One-to-one chat; the conversation is found or created on demand.
    Direct(UserId),
    /// An existing conversation the sender must be active in.
    Conversation(ConversationId),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendMessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_mime_type: Option<String>,
}

impl SendMessagePayload {
    /// Exactly one of `recipient_id` / `conversation_id` must be present.
    pub fn target(&self) -> Result<MessageTarget, ProtocolError> {
        match (self.recipient_id, self.conversation_id) {
            (Some(user), None) => Ok(MessageTarget::Direct(user)),
            (None, Some(conversation)) => Ok(MessageTarget::Conversation(conversation)),
            (Some(_), Some(_)) => Err(invalid_send(
                "recipient_id and conversation_id are mutually exclusive",
            )),
            (None, None) => Err(invalid_send(
                "either recipient_id or conversation_id must be provided",
            )),
        }
    }
}

fn invalid_send(reason: &str) -> ProtocolError {
    ProtocolError::InvalidPayload {
        kind: InboundKind::SendMessage.as_str().to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateConversationPayload {
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub participant_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GetMessagesPayload {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub limit: Option<u32>,
    /// Only messages created strictly before this instant. Accepts RFC 3339
    /// or RFC 2822 text; anything else is treated as absent.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub before: Option<DateTime<Utc>>,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|text| {
        DateTime::parse_from_rfc3339(&text)
            .or_else(|_| DateTime::parse_from_rfc2822(&text))
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationRef {
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRef {
    pub message_id: MessageId,
}

// ---------------------------------------------------------------------------
// Outbound (server -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(MessagePayload),
    ConversationCreated(ConversationCreatedPayload),
    ConversationsList(ConversationsListPayload),
    MessagesList(MessagesListPayload),
    TypingIndicator(TypingPayload),
    MessageRead(MessageReadPayload),
    MessageDelivered(MessageDeliveredPayload),
    MessageDeleted(MessageDeletedPayload),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            error: message.into(),
        })
    }

    /// Wire name of the event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::ConversationCreated(_) => "conversation_created",
            Self::ConversationsList(_) => "conversations_list",
            Self::MessagesList(_) => "messages_list",
            Self::TypingIndicator(_) => "typing_indicator",
            Self::MessageRead(_) => "message_read",
            Self::MessageDelivered(_) => "message_delivered",
            Self::MessageDeleted(_) => "message_deleted",
            Self::Error(_) => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A persisted message as clients see it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePayload {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationPayload {
    pub id: ConversationId,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationCreatedPayload {
    #[serde(flatten)]
    pub conversation: ConversationPayload,
    pub participant_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummaryPayload {
    #[serde(flatten)]
    pub conversation: ConversationPayload,
    pub participant_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePayload>,
    pub unread_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationsListPayload {
    pub conversations: Vec<ConversationSummaryPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagesListPayload {
    pub conversation_id: ConversationId,
    pub messages: Vec<MessagePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypingPayload {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageReadPayload {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    /// Number of status rows that moved to `read`.
    pub count: u32,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageDeliveredPayload {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub status: DeliveryStatus,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageDeletedPayload {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_send_message_to_conversation() {
        let conversation = ConversationId::new();
        let text = format!(
            r#"{{"type":"send_message","payload":{{"conversation_id":"{conversation}","content":"hi","message_type":"text"}}}}"#
        );

        let event = ClientEvent::from_json(&text).unwrap();
        let ClientEvent::SendMessage(payload) = event else {
            panic!("expected send_message, got {event:?}");
        };
        assert_eq!(payload.content, "hi");
        assert_eq!(payload.target().unwrap(), MessageTarget::Conversation(conversation));
    }

    #[test]
    fn send_message_requires_exactly_one_target() {
        let both = SendMessagePayload {
            conversation_id: Some(ConversationId::new()),
            recipient_id: Some(UserId::new()),
            content: "x".into(),
            message_type: MessageKind::Text,
            reply_to_message_id: None,
            media_url: None,
            media_size: None,
            media_mime_type: None,
        };
        assert!(both.target().is_err());

        let neither = SendMessagePayload {
            conversation_id: None,
            recipient_id: None,
            ..both
        };
        assert!(neither.target().is_err());
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let err = ClientEvent::from_json(r#"{"type":"change_room","payload":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedEvent(kind) if kind == "change_room"));
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = ClientEvent::from_json("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope(_)));
    }

    #[test]
    fn payload_is_decoded_only_for_known_kind() {
        let err = ClientEvent::from_json(r#"{"type":"mark_as_read","payload":{"id":1}}"#)
            .unwrap_err();
        assert!(
            matches!(err, ProtocolError::InvalidPayload { ref kind, .. } if kind == "mark_as_read")
        );
    }

    #[test]
    fn get_messages_before_is_lenient() {
        let conversation = ConversationId::new();
        let decode = |before: &str| {
            let text = format!(
                r#"{{"type":"get_messages","payload":{{"conversation_id":"{conversation}","before":{before}}}}}"#
            );
            match ClientEvent::from_json(&text).unwrap() {
                ClientEvent::GetMessages(payload) => payload.before,
                other => panic!("expected get_messages, got {other:?}"),
            }
        };

        let rfc3339 = decode(r#""2024-05-01T10:00:00Z""#).unwrap();
        let rfc2822 = decode(r#""Wed, 01 May 2024 10:00:00 GMT""#).unwrap();
        assert_eq!(rfc3339, rfc2822);
        assert_eq!(decode(r#""yesterday""#), None);
        assert_eq!(decode("null"), None);
    }

    #[test]
    fn get_conversations_needs_no_payload() {
        let event = ClientEvent::from_json(r#"{"type":"get_conversations"}"#).unwrap();
        assert_eq!(event, ClientEvent::GetConversations);
        assert_eq!(event.kind(), InboundKind::GetConversations);
    }

    #[test]
    fn server_event_uses_envelope_shape() {
        let json = ServerEvent::error("boom").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["error"], "boom");
    }

    #[test]
    fn conversation_created_flattens_conversation() {
        let now = Utc::now();
        let event = ServerEvent::ConversationCreated(ConversationCreatedPayload {
            conversation: ConversationPayload {
                id: ConversationId::new(),
                kind: ConversationKind::Group,
                name: Some("team".into()),
                created_by: Some(UserId::new()),
                created_at: now,
                updated_at: now,
            },
            participant_ids: vec![UserId::new()],
        });

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "conversation_created");
        assert_eq!(value["payload"]["type"], "group");
        assert_eq!(value["payload"]["name"], "team");
    }

    #[test]
    fn every_inbound_kind_round_trips_through_its_name() {
        for kind in InboundKind::ALL {
            assert_eq!(kind.as_str().parse::<InboundKind>().unwrap(), kind);
        }
    }
}
