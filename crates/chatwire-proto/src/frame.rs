//! Frame envelopes and codec.

use serde::{Deserialize, Serialize};

use crate::{
    error::ProtoError,
    event::{EventKind, InboundEvent},
    message::{ConversationRef, MarkAsRead, SendMessage, Typing},
};

/// Handshake event name for [`Connected`].
const CONNECTED: &str = "connected";

/// Handshake event name for [`ConnectError`].
const CONNECT_ERROR: &str = "connect_error";

/// Frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Send a message into a conversation.
    SendMessage(SendMessage),
    /// Mark a message as read.
    MarkAsRead(MarkAsRead),
    /// Start receiving a conversation's events.
    JoinConversation(ConversationRef),
    /// Stop receiving a conversation's events.
    LeaveConversation(ConversationRef),
    /// Typing indicator.
    Typing(Typing),
}

impl ClientFrame {
    /// Event name on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => "send_message",
            Self::MarkAsRead(_) => "mark_as_read",
            Self::JoinConversation(_) => "join_conversation",
            Self::LeaveConversation(_) => "leave_conversation",
            Self::Typing(_) => "typing",
        }
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(ProtoError::Encode)
    }

    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        let raw: RawFrame = serde_json::from_str(text).map_err(ProtoError::Malformed)?;
        if !matches!(
            raw.event.as_str(),
            "send_message" | "mark_as_read" | "join_conversation" | "leave_conversation" | "typing"
        ) {
            return Err(ProtoError::UnknownEvent { name: raw.event });
        }

        serde_json::from_str(text)
            .map_err(|source| ProtoError::InvalidPayload { event: raw.event, source })
    }
}

/// Handshake acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    /// Backend session identifier, if the backend assigns one.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Handshake rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectError {
    /// Why the backend refused the channel.
    pub message: String,
}

/// Frame sent by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Handshake accepted; the channel is usable.
    Connected(Connected),
    /// Handshake refused.
    ConnectError(ConnectError),
    /// Application event for subscribers.
    Event(InboundEvent),
}

/// Envelope as read off the wire, before the payload is interpreted.
#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Envelope for writing.
#[derive(Serialize)]
struct RawFrameRef<'a> {
    event: &'a str,
    data: serde_json::Value,
}

impl ServerFrame {
    /// Event name on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => CONNECTED,
            Self::ConnectError(_) => CONNECT_ERROR,
            Self::Event(event) => event.kind().wire_name(),
        }
    }

    /// Decode a JSON text frame.
    ///
    /// Unknown event names yield [`ProtoError::UnknownEvent`] so the caller
    /// can skip them without treating the channel as broken.
    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        let RawFrame { event, data } = serde_json::from_str(text).map_err(ProtoError::Malformed)?;

        let frame = match event.as_str() {
            CONNECTED if data.is_null() => Ok(Self::Connected(Connected::default())),
            CONNECTED => serde_json::from_value(data).map(Self::Connected),
            CONNECT_ERROR => serde_json::from_value(data).map(Self::ConnectError),
            name => {
                let kind =
                    EventKind::from_wire(name).ok_or_else(|| ProtoError::UnknownEvent {
                        name: name.to_string(),
                    })?;
                InboundEvent::from_data(kind, data).map(Self::Event)
            },
        };

        frame.map_err(|source| ProtoError::InvalidPayload { event, source })
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtoError> {
        let data = match self {
            Self::Connected(p) => serde_json::to_value(p),
            Self::ConnectError(p) => serde_json::to_value(p),
            Self::Event(event) => event.to_data(),
        }
        .map_err(ProtoError::Encode)?;

        serde_json::to_string(&RawFrameRef { event: self.event_name(), data })
            .map_err(ProtoError::Encode)
    }
}

impl From<InboundEvent> for ServerFrame {
    fn from(event: InboundEvent) -> Self {
        Self::Event(event)
    }
}
