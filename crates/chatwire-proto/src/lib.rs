//! Chatwire wire protocol.
//!
//! Every frame on the messaging channel is a JSON text message of the form
//! `{"event": <name>, "data": <payload>}`. This crate defines the payloads,
//! the closed set of inbound [`EventKind`]s, and the codec for both
//! directions.
//!
//! # Frames
//!
//! - [`ClientFrame`]: outbound intents (`send_message`, `mark_as_read`,
//!   `join_conversation`, `leave_conversation`, `typing`)
//! - [`ServerFrame`]: handshake control (`connected`, `connect_error`) or an
//!   application [`InboundEvent`]
//!
//! Payload field names are camelCase on the wire; event names are
//! snake_case.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
pub mod event;
pub mod frame;
mod ids;
pub mod message;

pub use error::ProtoError;
pub use event::{
    ConversationUpdated, EventKind, InboundEvent, MarkReadError, MessageError, MessageRead,
    MessageSent, UserTyping,
};
pub use frame::{ClientFrame, ConnectError, Connected, ServerFrame};
pub use ids::{ConversationId, CorrelationId, MessageId, UserId};
pub use message::{
    Attachment, ConversationRef, MarkAsRead, Message, OutboundMessageIntent, SendMessage, Sender,
    Typing,
};
