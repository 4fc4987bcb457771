//! Operations for model-based testing.
//!
//! Operations represent every input the connection lifecycle can see. They
//! are generated randomly by proptest (or by the fuzzer through
//! `arbitrary`) and applied to both the model and the real state machine.

use arbitrary::Arbitrary;
use chatwire_core::ConnectionAction;

/// Inputs to the connection lifecycle.
///
/// Events that carry a channel or retry ID can target the current one or a
/// stale one, so the staleness checks are exercised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// The user signs in; a credential becomes available.
    SignIn,
    /// The user signs out.
    SignOut,
    /// The application navigates.
    Navigate {
        /// Whether the new page is authentication-only.
        auth_route: bool,
    },
    /// Explicit connect request.
    Connect,
    /// Manual disconnect.
    Disconnect,
    /// A retry timer fires.
    RetryElapsed {
        /// Report the previous retry ID instead of the latest.
        stale: bool,
    },
    /// The transport could not open a channel.
    OpenFailed {
        /// Target the previous channel instead of the latest.
        stale: bool,
    },
    /// The backend acknowledged the handshake.
    Acknowledge {
        /// Target the previous channel instead of the latest.
        stale: bool,
    },
    /// The backend refused the handshake.
    Reject {
        /// Target the previous channel instead of the latest.
        stale: bool,
    },
    /// A frame or heartbeat arrived.
    Receive {
        /// Target the previous channel instead of the latest.
        stale: bool,
    },
    /// The transport closed a channel.
    Close {
        /// Target the previous channel instead of the latest.
        stale: bool,
    },
    /// Advance time, then run timeout processing.
    AdvanceTime {
        /// Milliseconds to advance.
        millis: u16,
    },
}

/// Observable effect of an operation, with the details the model does not
/// track (tokens, reasons, delays) stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelAction {
    /// A channel was opened.
    Open {
        /// Channel number.
        channel: u64,
    },
    /// A channel was closed by the client.
    Close {
        /// Channel number.
        channel: u64,
    },
    /// A heartbeat ping was sent.
    Ping {
        /// Channel number.
        channel: u64,
    },
    /// A reconnect was scheduled.
    Schedule {
        /// Retry number.
        retry: u64,
    },
    /// A scheduled reconnect was cancelled.
    Cancel {
        /// Retry number.
        retry: u64,
    },
    /// A received frame was accepted for dispatch.
    Deliver {
        /// Channel number.
        channel: u64,
    },
}

impl ModelAction {
    /// Project a real action onto the model's vocabulary.
    ///
    /// State changes are compared through [`crate::ObservableState`] instead.
    pub fn from_real(action: &ConnectionAction) -> Option<Self> {
        match action {
            ConnectionAction::OpenChannel { channel, .. } => {
                Some(Self::Open { channel: channel.0 })
            },
            ConnectionAction::CloseChannel { channel, .. } => {
                Some(Self::Close { channel: channel.0 })
            },
            ConnectionAction::SendHeartbeat { channel } => Some(Self::Ping { channel: channel.0 }),
            ConnectionAction::ScheduleRetry { retry, .. } => {
                Some(Self::Schedule { retry: retry.0 })
            },
            ConnectionAction::CancelRetry { retry } => Some(Self::Cancel { retry: retry.0 }),
            ConnectionAction::StateChanged { .. } => None,
        }
    }
}

/// Actions produced by one operation, in order.
pub type OperationResult = Vec<ModelAction>;
