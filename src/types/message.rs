use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Identifier of a message in the local conversation cache.
///
/// Messages sent by this client are inserted before the backend confirms
/// them.  They carry a provisional id from a separate namespace so they can
/// never be mistaken for a server-assigned id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageId {
    /// Assigned by the backend.
    Server(i64),
    /// Allocated locally before confirmation.
    Provisional(u64),
}

impl MessageId {
    /// Returns true for locally allocated ids.
    pub fn is_provisional(&self) -> bool {
        matches!(self, MessageId::Provisional(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Server(id) => write!(f, "{id}"),
            MessageId::Provisional(id) => write!(f, "local-{id}"),
        }
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sent by the user.
    User,
    /// Produced by the model.
    Assistant,
    /// Injected by the backend.
    System,
    /// Any role this client does not know about.
    #[serde(other)]
    Other,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Other => "other",
        };
        f.write_str(role)
    }
}

/// One turn in a conversation, as held in the local cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Server-assigned or provisional id.
    pub id: MessageId,
    /// Owning session.
    pub session_id: String,
    /// Author.
    pub role: Role,
    /// Text; grows while an answer streams in.
    pub content: String,
    /// Creation time.
    pub created_at: OffsetDateTime,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(
        id: MessageId,
        session_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            session_id: session_id.into(),
            role,
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// A message as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Server id.
    pub id: i64,
    /// Owning session.
    pub session_id: String,
    /// Author id, if any.
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Author role.
    pub role: Role,
    /// Message type; `text` for chat turns.
    #[serde(default = "default_message_type")]
    pub message_type: String,
    /// Text content.
    #[serde(default)]
    pub content_text: Option<String>,
    /// Message this one answers.
    #[serde(default)]
    pub reply_to_message_id: Option<i64>,
    /// Text extracted from attachments.
    #[serde(default)]
    pub parsed_text: Option<String>,
    /// Metadata extracted from attachments.
    #[serde(default)]
    pub parsed_meta: Option<Map<String, Value>>,
    /// Moderation status.
    #[serde(default)]
    pub audit_status: Option<String>,
    /// Creation time.
    #[serde(default, with = "crate::utils::time")]
    pub created_at: Option<OffsetDateTime>,
    /// Last update time.
    #[serde(default, with = "crate::utils::time")]
    pub updated_at: Option<OffsetDateTime>,
}

pub(crate) fn default_message_type() -> String {
    "text".to_string()
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: MessageId::Server(record.id),
            session_id: record.session_id,
            role: record.role,
            content: record.content_text.unwrap_or_default(),
            created_at: record.created_at.unwrap_or_else(OffsetDateTime::now_utc),
        }
    }
}

/// Body of `POST /chat/sessions/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreateParams {
    /// Text of the user turn.
    pub content: String,
    /// Message type.
    #[serde(default = "default_message_type")]
    pub message_type: String,
}

impl MessageCreateParams {
    /// A plain text turn.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_type: default_message_type(),
        }
    }
}

/// `GET /chat/sessions/{id}/messages` answers either a bare array or an
/// `{items}` envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessagePage {
    /// Bare array.
    Bare(Vec<MessageRecord>),
    /// Envelope.
    Items {
        /// Messages in the page.
        items: Vec<MessageRecord>,
    },
}

impl MessagePage {
    /// Returns the records in insertion order.
    pub fn into_records(self) -> Vec<MessageRecord> {
        match self {
            MessagePage::Bare(items) => items,
            MessagePage::Items { items } => items,
        }
    }
}
