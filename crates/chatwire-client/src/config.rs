//! Client configuration.

use std::time::Duration;

use chatwire_core::{AuthRoutes, BearerToken, ConnectionConfig};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::error::ClientError;

/// Query escaping for the token: everything but RFC 3986 unreserved characters.
const TOKEN_QUERY: &AsciiSet =
    &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Configuration for a [`MessagingClient`](crate::MessagingClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL (`ws://` or `wss://`).
    pub endpoint: String,
    /// Messaging namespace appended to the endpoint path.
    pub namespace: String,
    /// Routes on which connecting is deferred.
    pub auth_routes: AuthRoutes,
    /// How often the driver runs timeout processing.
    pub tick_interval: Duration,
    /// Reconnect, handshake and heartbeat timing.
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:3000".to_string(),
            namespace: "messages".to_string(),
            auth_routes: AuthRoutes::default(),
            tick_interval: Duration::from_secs(1),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Config for `endpoint` with defaults elsewhere.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), ..Self::default() }
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<(), ClientError> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(ClientError::InvalidConfig {
                reason: format!("endpoint must be a ws:// or wss:// URL, got {:?}", self.endpoint),
            });
        }

        if self.tick_interval.is_zero() {
            return Err(ClientError::InvalidConfig {
                reason: "tick_interval must be non-zero".to_string(),
            });
        }

        if self.connection.heartbeat_timeout <= self.connection.heartbeat_interval {
            return Err(ClientError::InvalidConfig {
                reason: "heartbeat_timeout must exceed heartbeat_interval".to_string(),
            });
        }

        Ok(())
    }

    /// Channel URL without credentials: `{endpoint}/{namespace}`.
    pub fn channel_url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        let namespace = self.namespace.trim_matches('/');
        if namespace.is_empty() {
            endpoint.to_string()
        } else {
            format!("{endpoint}/{namespace}")
        }
    }

    /// Full WebSocket URL carrying `token` in the `token` query field.
    pub fn ws_url(&self, token: &BearerToken) -> String {
        format!(
            "{}?token={}",
            self.channel_url(),
            utf8_percent_encode(token.as_str(), TOKEN_QUERY)
        )
    }
}
