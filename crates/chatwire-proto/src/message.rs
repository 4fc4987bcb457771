//! Message values and outbound intent payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, CorrelationId, MessageId, UserId};

/// Author of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Sender's user ID.
    pub id: UserId,
    /// Display name at the time the message was sent.
    pub name: String,
}

/// File reference attached to a message.
///
/// The file itself is uploaded out of band; only the reference travels over
/// the messaging channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Where the uploaded file can be fetched.
    pub url: String,
    /// Original file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// MIME type reported at upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A message as stored and relayed by the backend.
///
/// Immutable once received: the client only relays copies to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Backend-assigned message ID.
    pub id: MessageId,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender: Sender,
    /// Addressee, when the backend includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    /// Message body.
    pub content: String,
    /// Attached file reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// When the backend accepted the message.
    pub created_at: DateTime<Utc>,
    /// When the recipient read it. `None` while unread.
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Whether the recipient has read this message.
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// What a caller wants to send.
///
/// Has no identity until the backend assigns one and echoes it back in a
/// `message_sent` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessageIntent {
    /// Target conversation.
    pub conversation_id: ConversationId,
    /// Addressee.
    pub recipient_id: UserId,
    /// Message body.
    pub content: String,
    /// Optional attached file reference.
    pub attachment: Option<Attachment>,
}

impl OutboundMessageIntent {
    /// Create a text-only intent.
    pub fn new(
        conversation_id: impl Into<ConversationId>,
        recipient_id: UserId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            recipient_id,
            content: content.into(),
            attachment: None,
        }
    }

    /// Attach a file reference.
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// `send_message` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Target conversation.
    pub conversation_id: ConversationId,
    /// Addressee.
    pub recipient_id: UserId,
    /// Message body.
    pub content: String,
    /// Attached file reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// Echoed in `message_sent` / `message_error`.
    pub correlation_id: CorrelationId,
}

impl SendMessage {
    /// Stamp an intent with a correlation ID.
    pub fn from_intent(intent: OutboundMessageIntent, correlation_id: CorrelationId) -> Self {
        Self {
            conversation_id: intent.conversation_id,
            recipient_id: intent.recipient_id,
            content: intent.content,
            attachment: intent.attachment,
            correlation_id,
        }
    }
}

/// `mark_as_read` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsRead {
    /// Message to mark.
    pub message_id: MessageId,
    /// Echoed in `message_read` / `mark_read_error`.
    pub correlation_id: CorrelationId,
}

/// `join_conversation` / `leave_conversation` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    /// Conversation to join or leave.
    pub conversation_id: ConversationId,
}

/// `typing` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    /// Conversation being typed in.
    pub conversation_id: ConversationId,
    /// `true` when typing started, `false` when it stopped.
    pub is_typing: bool,
}
