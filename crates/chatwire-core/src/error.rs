//! Core error types.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors from the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// An outbound frame was attempted without a live channel.
    #[error("not connected (state: {state})")]
    NotConnected {
        /// State at the time of the attempt.
        state: ConnectionState,
    },
}

/// Errors from decoding the bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The token does not have three dot-separated segments.
    #[error("token is not a JWT")]
    NotJwt,

    /// The claims segment is not valid base64url.
    #[error("claims segment is not base64url: {reason}")]
    Encoding {
        /// Decoder message.
        reason: String,
    },

    /// The claims segment is not a JSON object.
    #[error("claims are not a JSON object: {reason}")]
    Claims {
        /// Parser message.
        reason: String,
    },

    /// No recognised user-ID claim.
    #[error("token carries no user id claim")]
    MissingUserId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ConnectionError::NotConnected { state: ConnectionState::Connecting };
        assert_eq!(err.to_string(), "not connected (state: connecting)");
        assert_eq!(SessionError::MissingUserId.to_string(), "token carries no user id claim");
    }
}
