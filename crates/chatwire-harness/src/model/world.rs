//! Model world: the connection plus the collaborators it consults.
//!
//! The world is the top-level container that tracks credentials, navigation
//! and virtual time, and routes each operation to the model connection.

use chatwire_core::{ConnectionConfig, ConnectionState};

use super::{
    connection::ModelConnection,
    operation::{Operation, OperationResult},
};

/// Observable state for oracle comparison.
///
/// This is the subset of lifecycle state that can be read back from the real
/// implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservableState {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Current channel number.
    pub channel: Option<u64>,
    /// Pending retry number.
    pub pending_retry: Option<u64>,
    /// Whether a manual disconnect is in effect.
    pub manual: bool,
    /// Channels opened so far.
    pub channels_opened: u64,
}

/// Model world - the reference implementation.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    connection: ModelConnection,
    signed_in: bool,
    auth_route: bool,
    now: u64,
}

impl ModelWorld {
    /// Signed-in world on a regular page at time zero.
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            connection: ModelConnection::new(config),
            signed_in: true,
            auth_route: false,
            now: 0,
        }
    }

    /// The model connection.
    pub fn connection(&self) -> &ModelConnection {
        &self.connection
    }

    /// Whether a credential is available.
    pub fn is_signed_in(&self) -> bool {
        self.signed_in
    }

    /// Whether the current page is authentication-only.
    pub fn on_auth_route(&self) -> bool {
        self.auth_route
    }

    /// Virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Channel number an event with the given staleness targets.
    pub fn channel_target(&self, stale: bool) -> u64 {
        target(self.connection.channels_opened(), stale)
    }

    /// Retry number a timer with the given staleness reports.
    pub fn retry_target(&self, stale: bool) -> u64 {
        target(self.connection.retries_scheduled(), stale)
    }

    /// Apply an operation and return the actions it produced.
    ///
    /// This is the main entry point for model-based testing. The result
    /// should match the real implementation's projected actions.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        let admissible = self.signed_in && !self.auth_route;
        match *op {
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
            Operation::Connect => self.connection.connect(admissible, self.now),
            Operation::Disconnect => self.connection.disconnect(),
            Operation::RetryElapsed { stale } => {
                let retry = self.retry_target(stale);
                self.connection.retry_elapsed(retry, admissible, self.now)
            },
            Operation::OpenFailed { stale } => {
                self.connection.open_failed(self.channel_target(stale))
            },
            Operation::Acknowledge { stale } => {
                self.connection.acknowledge(self.channel_target(stale), self.now)
            },
            Operation::Reject { stale } => self.connection.reject(self.channel_target(stale)),
            Operation::Receive { stale } => {
                self.connection.receive(self.channel_target(stale), self.now)
            },
            Operation::Close { stale } => self.connection.close(self.channel_target(stale)),
            Operation::AdvanceTime { millis } => {
                self.now += u64::from(millis);
                self.connection.tick(self.now)
            },
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            state: self.connection.state(),
            channel: self.connection.channel(),
            pending_retry: self.connection.pending_retry(),
            manual: self.connection.is_manual(),
            channels_opened: self.connection.channels_opened(),
        }
    }
}

/// Latest number, or the one before it for a stale target.
fn target(latest: u64, stale: bool) -> u64 {
    if stale { latest.saturating_sub(1) } else { latest }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelAction;

    #[test]
    fn signed_out_connect_is_ignored() {
        let mut world = ModelWorld::new(&ConnectionConfig::default());
        world.apply(&Operation::SignOut);
        assert!(world.apply(&Operation::Connect).is_empty());
        assert_eq!(world.observable_state().state, ConnectionState::Disconnected);
    }

    #[test]
    fn stale_events_are_ignored() {
        let mut world = ModelWorld::new(&ConnectionConfig::default());
        world.apply(&Operation::Connect);
        world.apply(&Operation::Close { stale: false });
        world.apply(&Operation::RetryElapsed { stale: false });

        assert!(world.apply(&Operation::Acknowledge { stale: true }).is_empty());
        assert_eq!(world.observable_state().state, ConnectionState::Connecting);
        assert!(world.apply(&Operation::Acknowledge { stale: false }).is_empty());
        assert_eq!(
            world.apply(&Operation::Receive { stale: false }),
            [ModelAction::Deliver { channel: 2 }]
        );
    }
}
