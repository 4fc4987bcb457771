//! Adapter that drives the real state machine with model operations.

use std::time::Duration;

use chatwire_core::{BearerToken, ChannelId, ConnectContext, Connection, ConnectionConfig, RetryId};

use crate::model::{ModelAction, ObservableState, Operation, OperationResult};

/// Real [`Connection`] wrapper that mirrors [`crate::ModelWorld`]'s interface.
///
/// Channel and retry targets are derived from the actions the real machine
/// emitted, not from the model.
#[derive(Debug)]
pub struct RealWorld {
    connection: Connection<Duration>,
    signed_in: bool,
    auth_route: bool,
    now: Duration,
    latest_channel: u64,
    latest_retry: u64,
}

impl RealWorld {
    /// Signed-in world on a regular page at time zero.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            connection: Connection::new(config),
            signed_in: true,
            auth_route: false,
            now: Duration::ZERO,
            latest_channel: 0,
            latest_retry: 0,
        }
    }

    fn context(&self) -> ConnectContext {
        ConnectContext {
            token: self.signed_in.then(|| BearerToken::new("header.claims.sig")),
            on_auth_route: self.auth_route,
        }
    }

    fn channel(&self, stale: bool) -> ChannelId {
        ChannelId(if stale { self.latest_channel.saturating_sub(1) } else { self.latest_channel })
    }

    fn retry(&self, stale: bool) -> RetryId {
        RetryId(if stale { self.latest_retry.saturating_sub(1) } else { self.latest_retry })
    }

    /// Apply an operation and return the projected actions.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        let now = self.now;
        let actions = match *op {
            Operation::SignIn => {
                self.signed_in = true;
                Vec::new()
            },
            Operation::SignOut => {
                self.signed_in = false;
                Vec::new()
            },
            Operation::Navigate { auth_route } => {
                self.auth_route = auth_route;
                Vec::new()
            },
            Operation::Connect => self.connection.connect(self.context(), now),
            Operation::Disconnect => self.connection.disconnect(),
            Operation::RetryElapsed { stale } => {
                let retry = self.retry(stale);
                self.connection.retry_elapsed(retry, self.context(), now)
            },
            Operation::OpenFailed { stale } => {
                let channel = self.channel(stale);
                self.connection.channel_failed(channel, "refused".to_string(), now)
            },
            Operation::Acknowledge { stale } => {
                let channel = self.channel(stale);
                self.connection.handshake_acknowledged(channel, Some("s".to_string()), now)
            },
            Operation::Reject { stale } => {
                let channel = self.channel(stale);
                self.connection.handshake_rejected(channel, "expired".to_string(), now)
            },
            Operation::Receive { stale } => {
                let channel = self.channel(stale);
                return if self.connection.frame_received(channel, now) {
                    vec![ModelAction::Deliver { channel: channel.0 }]
                } else {
                    Vec::new()
                };
            },
            Operation::Close { stale } => {
                let channel = self.channel(stale);
                self.connection.channel_closed(channel, "reset".to_string(), now)
            },
            Operation::AdvanceTime { millis } => {
                self.now += Duration::from_millis(u64::from(millis));
                self.connection.tick(self.now)
            },
        };

        let projected: Vec<_> = actions.iter().filter_map(ModelAction::from_real).collect();
        for action in &projected {
            match action {
                ModelAction::Open { channel } => self.latest_channel = *channel,
                ModelAction::Schedule { retry } => self.latest_retry = *retry,
                _ => {},
            }
        }
        projected
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            state: self.connection.state(),
            channel: self.connection.channel().map(|c| c.0),
            pending_retry: self.connection.pending_retry().map(|r| r.0),
            manual: self.connection.is_manually_disconnected(),
            channels_opened: self.connection.channels_opened(),
        }
    }

    /// The wrapped state machine.
    pub fn connection(&self) -> &Connection<Duration> {
        &self.connection
    }
}
