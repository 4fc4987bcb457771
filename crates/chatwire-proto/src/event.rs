//! Inbound application events.
//!
//! Each event belongs to exactly one [`EventKind`]. Subscribers register per
//! kind, so the kind set is closed: adding a kind is a protocol change.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ids::{ConversationId, CorrelationId, MessageId, UserId},
    message::Message,
};

/// Error code used for failures reported locally rather than by the backend.
pub const NOT_CONNECTED_CODE: &str = "not_connected";

/// Closed set of inbound event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// A message arrived in one of the user's conversations.
    NewMessage,
    /// The backend accepted a message this client sent.
    MessageSent,
    /// The backend refused a message this client sent.
    MessageError,
    /// A message was marked read.
    MessageRead,
    /// Conversation metadata changed (last message, unread count).
    ConversationUpdated,
    /// Another participant started or stopped typing.
    UserTyping,
    /// The backend refused a mark-as-read request.
    MarkReadError,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::NewMessage,
        Self::MessageSent,
        Self::MessageError,
        Self::MessageRead,
        Self::ConversationUpdated,
        Self::UserTyping,
        Self::MarkReadError,
    ];

    /// Event name on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::NewMessage => "new_message",
            Self::MessageSent => "message_sent",
            Self::MessageError => "message_error",
            Self::MessageRead => "message_read",
            Self::ConversationUpdated => "conversation_updated",
            Self::UserTyping => "user_typing",
            Self::MarkReadError => "mark_read_error",
        }
    }

    /// Look up a kind by its wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// `message_sent` payload: the stored message as the backend echoes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSent {
    /// The message with its backend-assigned ID.
    pub message: Message,
    /// Correlation ID from the originating `send_message`.
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
}

/// `message_error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageError {
    /// Correlation ID from the originating `send_message`.
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    /// Machine-readable error code.
    #[serde(default)]
    pub code: Option<String>,
    /// Human-readable description.
    pub error: String,
}

impl MessageError {
    /// Failure reported locally when a send is attempted without a live
    /// channel.
    pub fn not_connected(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            code: Some(NOT_CONNECTED_CODE.to_string()),
            error: "not connected to the messaging backend".to_string(),
        }
    }

    /// Whether this failure was produced locally because no channel was live.
    pub fn is_not_connected(&self) -> bool {
        self.code.as_deref() == Some(NOT_CONNECTED_CODE)
    }
}

/// `message_read` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    /// Message that was read.
    pub message_id: MessageId,
    /// Conversation the message belongs to.
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    /// Who read it.
    #[serde(default)]
    pub reader_id: Option<UserId>,
    /// When it was read.
    pub read_at: DateTime<Utc>,
    /// Correlation ID, present when this client issued the `mark_as_read`.
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
}

/// `conversation_updated` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationUpdated {
    /// Conversation that changed.
    pub conversation_id: ConversationId,
    /// Latest message, if it changed.
    #[serde(default)]
    pub last_message: Option<Message>,
    /// Unread count for the current user.
    #[serde(default)]
    pub unread_count: Option<u64>,
    /// When the change happened.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// `user_typing` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    /// Conversation being typed in.
    pub conversation_id: ConversationId,
    /// Who is typing.
    pub user_id: UserId,
    /// Display name, when the backend includes it.
    #[serde(default)]
    pub user_name: Option<String>,
    /// `true` while typing.
    pub is_typing: bool,
}

/// `mark_read_error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadError {
    /// Message the request referred to.
    #[serde(default)]
    pub message_id: Option<MessageId>,
    /// Correlation ID from the originating `mark_as_read`.
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    /// Machine-readable error code.
    #[serde(default)]
    pub code: Option<String>,
    /// Human-readable description.
    pub error: String,
}

impl MarkReadError {
    /// Failure reported locally when a mark-as-read is attempted without a
    /// live channel.
    pub fn not_connected(message_id: MessageId, correlation_id: CorrelationId) -> Self {
        Self {
            message_id: Some(message_id),
            correlation_id: Some(correlation_id),
            code: Some(NOT_CONNECTED_CODE.to_string()),
            error: "not connected to the messaging backend".to_string(),
        }
    }
}

/// An inbound application event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// `new_message`
    NewMessage(Message),
    /// `message_sent`
    MessageSent(MessageSent),
    /// `message_error`
    MessageError(MessageError),
    /// `message_read`
    MessageRead(MessageRead),
    /// `conversation_updated`
    ConversationUpdated(ConversationUpdated),
    /// `user_typing`
    UserTyping(UserTyping),
    /// `mark_read_error`
    MarkReadError(MarkReadError),
}

impl InboundEvent {
    /// The kind this event is dispatched under.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::MessageSent(_) => EventKind::MessageSent,
            Self::MessageError(_) => EventKind::MessageError,
            Self::MessageRead(_) => EventKind::MessageRead,
            Self::ConversationUpdated(_) => EventKind::ConversationUpdated,
            Self::UserTyping(_) => EventKind::UserTyping,
            Self::MarkReadError(_) => EventKind::MarkReadError,
        }
    }

    /// Correlation ID carried by acknowledgement and failure events.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::MessageSent(e) => e.correlation_id.as_ref(),
            Self::MessageError(e) => e.correlation_id.as_ref(),
            Self::MessageRead(e) => e.correlation_id.as_ref(),
            Self::MarkReadError(e) => e.correlation_id.as_ref(),
            Self::NewMessage(_) | Self::ConversationUpdated(_) | Self::UserTyping(_) => None,
        }
    }

    /// Decode the `data` field of a frame whose event name mapped to `kind`.
    pub(crate) fn from_data(
        kind: EventKind,
        data: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EventKind::NewMessage => Self::NewMessage(serde_json::from_value(data)?),
            EventKind::MessageSent => Self::MessageSent(serde_json::from_value(data)?),
            EventKind::MessageError => Self::MessageError(serde_json::from_value(data)?),
            EventKind::MessageRead => Self::MessageRead(serde_json::from_value(data)?),
            EventKind::ConversationUpdated => {
                Self::ConversationUpdated(serde_json::from_value(data)?)
            },
            EventKind::UserTyping => Self::UserTyping(serde_json::from_value(data)?),
            EventKind::MarkReadError => Self::MarkReadError(serde_json::from_value(data)?),
        })
    }

    /// Encode the payload as the `data` field of a frame.
    pub(crate) fn to_data(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::NewMessage(p) => serde_json::to_value(p),
            Self::MessageSent(p) => serde_json::to_value(p),
            Self::MessageError(p) => serde_json::to_value(p),
            Self::MessageRead(p) => serde_json::to_value(p),
            Self::ConversationUpdated(p) => serde_json::to_value(p),
            Self::UserTyping(p) => serde_json::to_value(p),
            Self::MarkReadError(p) => serde_json::to_value(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_unique_and_reversible() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_wire(kind.wire_name()), Some(kind));
        }

        let mut names: Vec<_> = EventKind::ALL.iter().map(|k| k.wire_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EventKind::ALL.len());
    }

    #[test]
    fn unknown_wire_name() {
        assert_eq!(EventKind::from_wire("send_message"), None);
        assert_eq!(EventKind::from_wire(""), None);
    }

    #[test]
    fn not_connected_error_is_tagged() {
        let err = MessageError::not_connected(CorrelationId::new("c-1"));
        assert!(err.is_not_connected());
        assert_eq!(err.correlation_id, Some(CorrelationId::new("c-1")));

        let backend = MessageError { correlation_id: None, code: None, error: "spam".into() };
        assert!(!backend.is_not_connected());
    }

    #[test]
    fn correlation_id_only_on_acknowledgements() {
        let event = InboundEvent::MarkReadError(MarkReadError::not_connected(
            "m-1".to_string(),
            CorrelationId::new("c-9"),
        ));
        assert_eq!(event.correlation_id().map(CorrelationId::as_str), Some("c-9"));

        let typing = InboundEvent::UserTyping(UserTyping {
            conversation_id: "c1".into(),
            user_id: 3,
            user_name: None,
            is_typing: true,
        });
        assert_eq!(typing.correlation_id(), None);
        assert_eq!(typing.kind(), EventKind::UserTyping);
    }
}
