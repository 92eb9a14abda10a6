//! Domain model structs persisted in the chat database.
//!
//! Every struct derives `Serialize` and `Deserialize`; the `From` impls at the
//! bottom turn them into the payload shapes of the wire protocol.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use murmur_shared::protocol::{ConversationPayload, ConversationSummaryPayload, MessagePayload};
use murmur_shared::types::{
    ConversationId, ConversationKind, DeliveryStatus, MessageId, MessageKind, ParticipantRole,
    UserId,
};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// An account known to the auth service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A direct (two-person) or group conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    /// Display name; only groups have one.
    pub name: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership of a user in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    /// Set when the user left; a participant is active while this is `None`.
    pub left_at: Option<DateTime<Utc>>,
    pub role: ParticipantRole,
}

impl Participant {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// A conversation as listed for one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    /// Active participants only.
    pub participant_count: u32,
    pub last_message: Option<Message>,
    /// Messages addressed to the user that are not yet `read`.
    pub unread_count: u32,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageKind,
    pub media_url: Option<String>,
    pub media_size: Option<i64>,
    pub media_mime_type: Option<String>,
    pub reply_to_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Fields supplied by the sender; ids and timestamps are assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageKind,
    pub media_url: Option<String>,
    pub media_size: Option<i64>,
    pub media_mime_type: Option<String>,
    pub reply_to_message_id: Option<MessageId>,
}

impl NewMessage {
    pub fn text(conversation_id: ConversationId, sender_id: UserId, content: &str) -> Self {
        Self {
            conversation_id,
            sender_id,
            content: content.to_string(),
            message_type: MessageKind::Text,
            media_url: None,
            media_size: None,
            media_mime_type: None,
            reply_to_message_id: None,
        }
    }
}

/// Delivery state of one message for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageStatus {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Timestamps are stored with fixed microsecond precision so that text
/// comparison in SQL orders them chronologically.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time truncated to the stored precision, with its column text.
pub(crate) fn now_ts() -> (DateTime<Utc>, String) {
    let now = Utc::now().trunc_subsecs(6);
    let text = format_ts(&now);
    (now, text)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

pub(crate) fn uuid_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_uuid_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn ts_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_ts_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| conversion_error(idx, e))
}

/// Parse a text-backed enum column (`direct`, `sent`, ...).
pub(crate) fn enum_col<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

// ---------------------------------------------------------------------------
// Wire conversions
// ---------------------------------------------------------------------------

impl From<Message> for MessagePayload {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            conversation_id: m.conversation_id,
            sender_id: m.sender_id,
            content: m.content,
            message_type: m.message_type,
            media_url: m.media_url,
            media_size: m.media_size,
            media_mime_type: m.media_mime_type,
            reply_to_message_id: m.reply_to_message_id,
            created_at: m.created_at,
            edited_at: m.edited_at,
            deleted_at: m.deleted_at,
        }
    }
}

impl From<Conversation> for ConversationPayload {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            kind: c.kind,
            name: c.name,
            created_by: c.created_by,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

impl From<ConversationSummary> for ConversationSummaryPayload {
    fn from(s: ConversationSummary) -> Self {
        Self {
            conversation: s.conversation.into(),
            participant_count: s.participant_count,
            last_message: s.last_message.map(Into::into),
            unread_count: s.unread_count,
        }
    }
}
