//! Client error types.

use chatwire_core::{ConnectionError, ConnectionState};
use thiserror::Error;

/// Errors returned by façade commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// No live channel; nothing was transmitted.
    #[error("not connected (state: {state})")]
    NotConnected {
        /// State at the time of the call.
        state: ConnectionState,
    },

    /// The client was torn down.
    #[error("client is closed")]
    Closed,
}

impl CommandError {
    /// Returns true if retrying the command can never succeed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::NotConnected { .. } => false,
        }
    }
}

impl From<ConnectionError> for CommandError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NotConnected { state } => Self::NotConnected { state },
        }
    }
}

/// Errors from opening or using a channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The socket or WebSocket upgrade failed.
    #[error("connect failed: {reason}")]
    Connect {
        /// Underlying error message.
        reason: String,
    },

    /// The peer violated the WebSocket protocol.
    #[error("protocol error: {reason}")]
    Protocol {
        /// Underlying error message.
        reason: String,
    },

    /// The channel is already closed.
    #[error("channel closed")]
    Closed,
}

/// Errors from client lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The configuration cannot work.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: String,
    },

    /// The client was torn down.
    #[error("client is closed")]
    Closed,

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ClientError {
    /// Returns true if the client cannot be used any further.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidConfig { .. } | Self::Closed => true,
            Self::Transport(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_is_transient() {
        let err = CommandError::NotConnected { state: ConnectionState::Disconnected };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "not connected (state: disconnected)");
    }

    #[test]
    fn closed_is_fatal() {
        assert!(CommandError::Closed.is_fatal());
        assert!(ClientError::Closed.is_fatal());
    }

    #[test]
    fn connection_error_converts() {
        let err: CommandError =
            ConnectionError::NotConnected { state: ConnectionState::Connecting }.into();
        assert_eq!(err, CommandError::NotConnected { state: ConnectionState::Connecting });
    }

    #[test]
    fn transport_error_display() {
        let err = ClientError::from(TransportError::Connect { reason: "refused".to_string() });
        assert_eq!(err.to_string(), "transport error: connect failed: refused");
        assert!(!err.is_fatal());
    }
}
