//! Codec errors.

use thiserror::Error;

/// Errors from encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The text is not a JSON `{"event", "data"}` envelope.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The envelope names an event this client does not know.
    #[error("unknown event: {name}")]
    UnknownEvent {
        /// Event name as received.
        name: String,
    },

    /// The envelope is valid but its payload does not match the event.
    #[error("invalid payload for {event}: {source}")]
    InvalidPayload {
        /// Event name as received.
        event: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// A frame could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtoError {
    /// Unknown events come from a newer backend and are safe to skip.
    pub fn is_unknown_event(&self) -> bool {
        matches!(self, Self::UnknownEvent { .. })
    }
}
