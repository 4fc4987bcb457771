//! Connection lifecycle state machine.
//!
//! Tracks the single physical channel to the messaging backend: whether one
//! exists, whether its handshake completed, and whether a reconnect is
//! pending. Pure state machine: every method takes the triggering event and
//! returns [`ConnectionAction`]s for the driver to execute.
//!
//! # States
//!
//! ```text
//!                connect (token, non-auth route)
//!   Disconnected ──────────────────────────────▶ Connecting
//!        ▲  ▲                                       │
//!        │  └── handshake failed / timeout ─────────┤ connected ack
//!        │      (schedule retry)                    ▼
//!        └───── unexpected close (schedule retry) ─ Connected
//! ```
//!
//! Manual [`Connection::disconnect`] returns to `Disconnected` from any state,
//! cancels the pending retry and suppresses automatic retries until the next
//! explicit [`Connection::connect`].
//!
//! # Invariants
//!
//! - At most one channel: a channel ID exists iff the state is not
//!   `Disconnected`.
//! - At most one pending retry, and only while `Disconnected` without a manual
//!   disconnect.
//! - Events carrying a channel or retry ID that is no longer current are
//!   ignored.

use std::{fmt, ops::Sub, time::Duration};

use crate::{error::ConnectionError, session::BearerToken};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No channel exists.
    #[default]
    Disconnected,
    /// A channel is being opened or its handshake has not been acknowledged.
    Connecting,
    /// Handshake acknowledged; outbound frames may be sent.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Identifier of one physical channel attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Identifier of one scheduled reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RetryId(pub u64);

impl fmt::Display for RetryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "retry-{}", self.0)
    }
}

/// Why a channel went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller asked to disconnect.
    Manual,
    /// The backend sent `connect_error`.
    HandshakeRejected {
        /// Backend-supplied reason.
        message: String,
    },
    /// No handshake acknowledgement within the configured timeout.
    HandshakeTimeout,
    /// Nothing received from the backend within the heartbeat timeout.
    HeartbeatTimeout,
    /// The channel could not be opened at all.
    OpenFailed {
        /// Transport error message.
        reason: String,
    },
    /// The transport closed underneath us.
    Transport {
        /// Transport-supplied reason.
        reason: String,
    },
}

impl CloseReason {
    /// Whether this close was requested by the caller.
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual disconnect"),
            Self::HandshakeRejected { message } => write!(f, "handshake rejected: {message}"),
            Self::HandshakeTimeout => f.write_str("handshake timed out"),
            Self::HeartbeatTimeout => f.write_str("heartbeat timed out"),
            Self::OpenFailed { reason } => write!(f, "open failed: {reason}"),
            Self::Transport { reason } => write!(f, "transport closed: {reason}"),
        }
    }
}

/// What the collaborators reported at the moment a connect was attempted.
#[derive(Debug, Clone, Default)]
pub struct ConnectContext {
    /// Current bearer credential, if the user is signed in.
    pub token: Option<BearerToken>,
    /// Whether the current route is an authentication-only page.
    pub on_auth_route: bool,
}

impl ConnectContext {
    /// Context for a signed-in user on a regular page.
    pub fn signed_in(token: BearerToken) -> Self {
        Self { token: Some(token), on_auth_route: false }
    }
}

/// Actions returned by the state machine for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a physical channel and start the handshake.
    OpenChannel {
        /// ID to tag every event from this channel with.
        channel: ChannelId,
        /// Credential to present.
        token: BearerToken,
    },
    /// Tear down a channel.
    CloseChannel {
        /// Channel to close.
        channel: ChannelId,
        /// Why.
        reason: CloseReason,
    },
    /// Send a heartbeat ping on the live channel.
    SendHeartbeat {
        /// Channel to ping.
        channel: ChannelId,
    },
    /// Arm a timer that reports [`Connection::retry_elapsed`] after `delay`.
    ScheduleRetry {
        /// ID to report back when the timer fires.
        retry: RetryId,
        /// How long to wait.
        delay: Duration,
    },
    /// Disarm a previously scheduled timer.
    CancelRetry {
        /// Timer to cancel.
        retry: RetryId,
    },
    /// The observable state changed.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
}

/// Timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Fixed delay before a reconnect attempt.
    pub reconnect_delay: Duration,
    /// Maximum time between opening a channel and the handshake ack.
    pub handshake_timeout: Duration,
    /// How often to ping a live channel.
    pub heartbeat_interval: Duration,
    /// Maximum silence from the backend before the channel is presumed dead.
    pub heartbeat_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(25),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }
}

/// Connection lifecycle state machine.
///
/// # Type Parameters
///
/// - `I`: instant type supplied by the environment; only differences between
///   instants are used
#[derive(Debug)]
pub struct Connection<I> {
    config: ConnectionConfig,
    state: ConnectionState,
    /// Current channel. `Some` iff `state != Disconnected`.
    channel: Option<ChannelId>,
    next_channel: u64,
    /// Explicit pending-retry handle.
    pending_retry: Option<RetryId>,
    next_retry: u64,
    /// Set by [`Connection::disconnect`], cleared by [`Connection::connect`].
    manual: bool,
    handshake_started: Option<I>,
    last_received: Option<I>,
    last_heartbeat: Option<I>,
    session_id: Option<String>,
}

impl<I> Connection<I>
where
    I: Copy + Ord + fmt::Debug + Sub<Output = Duration>,
{
    /// Create a disconnected state machine.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            channel: None,
            next_channel: 0,
            pending_retry: None,
            next_retry: 0,
            manual: false,
            handshake_started: None,
            last_received: None,
            last_heartbeat: None,
            session_id: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether outbound frames may be sent.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Current channel, if any.
    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    /// Pending reconnect, if any.
    pub fn pending_retry(&self) -> Option<RetryId> {
        self.pending_retry
    }

    /// Whether automatic reconnects are suppressed by a manual disconnect.
    pub fn is_manually_disconnected(&self) -> bool {
        self.manual
    }

    /// Backend session ID from the last handshake acknowledgement.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Number of channels opened so far.
    pub fn channels_opened(&self) -> u64 {
        self.next_channel
    }

    /// Timing configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Channel to send on, or `NotConnected`.
    pub fn ensure_connected(&self) -> Result<ChannelId, ConnectionError> {
        match (self.state, self.channel) {
            (ConnectionState::Connected, Some(channel)) => Ok(channel),
            (state, _) => Err(ConnectionError::NotConnected { state }),
        }
    }

    /// Explicit connect request.
    ///
    /// Clears a previous manual disconnect. Silently does nothing when a
    /// channel already exists, when no credential is available, or when the
    /// current route is authentication-only. A pending retry is cancelled
    /// because this attempt supersedes it.
    pub fn connect(&mut self, ctx: ConnectContext, now: I) -> Vec<ConnectionAction> {
        self.manual = false;

        let mut actions = Vec::new();
        let Some(token) = self.admissible_token(ctx) else {
            return actions;
        };

        if let Some(retry) = self.pending_retry.take() {
            tracing::debug!(%retry, "explicit connect supersedes pending retry");
            actions.push(ConnectionAction::CancelRetry { retry });
        }

        self.open(token, now, &mut actions);
        actions
    }

    /// A scheduled retry fired.
    ///
    /// Ignored unless `retry` is the currently pending one. Subject to the
    /// same credential and route checks as [`Connection::connect`], but does
    /// not clear a manual disconnect.
    pub fn retry_elapsed(
        &mut self,
        retry: RetryId,
        ctx: ConnectContext,
        now: I,
    ) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if self.pending_retry != Some(retry) {
            tracing::trace!(%retry, "ignoring stale retry");
            return actions;
        }
        self.pending_retry = None;

        if self.manual {
            return actions;
        }

        if let Some(token) = self.admissible_token(ctx) {
            tracing::info!(%retry, "reconnecting");
            self.open(token, now, &mut actions);
        }
        actions
    }

    /// The transport could not open `channel`.
    pub fn channel_failed(
        &mut self,
        channel: ChannelId,
        reason: String,
        _now: I,
    ) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if self.is_current(channel) && self.state == ConnectionState::Connecting {
            self.lose_channel(CloseReason::OpenFailed { reason }, false, &mut actions);
        }
        actions
    }

    /// The backend acknowledged the handshake on `channel`.
    pub fn handshake_acknowledged(
        &mut self,
        channel: ChannelId,
        session_id: Option<String>,
        now: I,
    ) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if !self.is_current(channel) || self.state != ConnectionState::Connecting {
            tracing::debug!(%channel, state = %self.state, "ignoring unexpected handshake ack");
            return actions;
        }

        self.handshake_started = None;
        self.last_received = Some(now);
        self.last_heartbeat = Some(now);
        self.session_id = session_id;
        self.transition(ConnectionState::Connected, &mut actions);
        actions
    }

    /// The backend refused the handshake on `channel`.
    pub fn handshake_rejected(
        &mut self,
        channel: ChannelId,
        message: String,
        _now: I,
    ) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if self.is_current(channel) && self.state == ConnectionState::Connecting {
            self.lose_channel(CloseReason::HandshakeRejected { message }, true, &mut actions);
        }
        actions
    }

    /// Something arrived on `channel`.
    ///
    /// Returns whether the frame belongs to the live, connected channel and
    /// should be dispatched.
    pub fn frame_received(&mut self, channel: ChannelId, now: I) -> bool {
        if self.is_current(channel) && self.state == ConnectionState::Connected {
            self.last_received = Some(now);
            true
        } else {
            false
        }
    }

    /// The transport closed `channel` without being asked to.
    pub fn channel_closed(
        &mut self,
        channel: ChannelId,
        reason: String,
        _now: I,
    ) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if !self.is_current(channel) {
            tracing::trace!(%channel, "ignoring close of stale channel");
            return actions;
        }

        self.lose_channel(CloseReason::Transport { reason }, false, &mut actions);
        actions
    }

    /// Manual disconnect.
    ///
    /// Cancels the pending retry, closes the channel and suppresses automatic
    /// reconnects until the next [`Connection::connect`].
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        self.manual = true;

        if let Some(retry) = self.pending_retry.take() {
            actions.push(ConnectionAction::CancelRetry { retry });
        }

        if let Some(channel) = self.channel.take() {
            actions.push(ConnectionAction::CloseChannel { channel, reason: CloseReason::Manual });
        }

        self.clear_timers();
        self.session_id = None;
        self.transition(ConnectionState::Disconnected, &mut actions);
        actions
    }

    /// Timeout processing: handshake deadline, heartbeat pings and heartbeat
    /// timeout.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        let Some(channel) = self.channel else {
            return actions;
        };

        match self.state {
            ConnectionState::Connecting => {
                if let Some(started) = self.handshake_started
                    && now - started >= self.config.handshake_timeout
                {
                    self.lose_channel(CloseReason::HandshakeTimeout, true, &mut actions);
                }
            },
            ConnectionState::Connected => {
                if let Some(last) = self.last_received
                    && now - last >= self.config.heartbeat_timeout
                {
                    self.lose_channel(CloseReason::HeartbeatTimeout, true, &mut actions);
                } else if let Some(last_ping) = self.last_heartbeat
                    && now - last_ping >= self.config.heartbeat_interval
                {
                    self.last_heartbeat = Some(now);
                    actions.push(ConnectionAction::SendHeartbeat { channel });
                }
            },
            ConnectionState::Disconnected => {},
        }

        actions
    }

    fn is_current(&self, channel: ChannelId) -> bool {
        self.channel == Some(channel)
    }

    /// Credential to open with, if a connect is admissible right now.
    fn admissible_token(&self, ctx: ConnectContext) -> Option<BearerToken> {
        if self.state != ConnectionState::Disconnected {
            tracing::trace!(state = %self.state, "connect ignored: channel already exists");
            return None;
        }

        let Some(token) = ctx.token else {
            tracing::debug!("connect deferred: no credential");
            return None;
        };

        if ctx.on_auth_route {
            tracing::debug!("connect deferred: authentication route");
            return None;
        }

        Some(token)
    }

    fn open(&mut self, token: BearerToken, now: I, actions: &mut Vec<ConnectionAction>) {
        self.next_channel += 1;
        let channel = ChannelId(self.next_channel);

        self.channel = Some(channel);
        self.handshake_started = Some(now);
        self.transition(ConnectionState::Connecting, actions);
        actions.push(ConnectionAction::OpenChannel { channel, token });
    }

    /// Drop the current channel after a failure and schedule a retry.
    fn lose_channel(
        &mut self,
        reason: CloseReason,
        close: bool,
        actions: &mut Vec<ConnectionAction>,
    ) {
        let Some(channel) = self.channel.take() else {
            return;
        };

        tracing::warn!(%channel, %reason, "channel lost");
        if close {
            actions.push(ConnectionAction::CloseChannel { channel, reason });
        }

        self.clear_timers();
        self.session_id = None;
        self.transition(ConnectionState::Disconnected, actions);
        self.schedule_retry(actions);
    }

    /// Idempotent: at most one retry is ever pending.
    fn schedule_retry(&mut self, actions: &mut Vec<ConnectionAction>) {
        if self.manual {
            return;
        }

        if let Some(retry) = self.pending_retry {
            tracing::debug!(%retry, "retry already pending");
            return;
        }

        self.next_retry += 1;
        let retry = RetryId(self.next_retry);
        self.pending_retry = Some(retry);

        let delay = self.config.reconnect_delay;
        tracing::info!(%retry, ?delay, "scheduling reconnect");
        actions.push(ConnectionAction::ScheduleRetry { retry, delay });
    }

    fn clear_timers(&mut self) {
        self.handshake_started = None;
        self.last_received = None;
        self.last_heartbeat = None;
    }

    fn transition(&mut self, to: ConnectionState, actions: &mut Vec<ConnectionAction>) {
        let from = self.state;
        if from != to {
            tracing::debug!(%from, %to, "connection state changed");
            self.state = to;
            actions.push(ConnectionAction::StateChanged { from, to });
        }
    }
}
