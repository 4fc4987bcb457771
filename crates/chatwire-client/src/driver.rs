//! Driver event loop.
//!
//! One task per client context owns the [`Connection`] state machine, the
//! [`Dispatcher`] and the live channel. Every input is a turn of this loop:
//!
//! ```text
//!   façade commands ──┐
//!   channel events ───┼──▶ Driver ──▶ Connection ──actions──▶ execute
//!   retry timers ─────┤                  │
//!   tick ─────────────┘                  └──▶ Dispatcher ──▶ listeners
//! ```
//!
//! Internal events (channel traffic, timers) are polled before façade
//! commands so a command issued from a listener observes the effects of the
//! event that triggered it.

use std::{collections::BTreeSet, sync::Arc};

use chatwire_core::{
    ChannelId, ConnectContext, Connection, ConnectionAction, ConnectionState, Dispatcher,
    Environment, RetryId, RouteAwareness, TokenSource,
};
use chatwire_proto::{ClientFrame, ConversationId, ConversationRef, InboundEvent, ServerFrame};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    config::ClientConfig,
    transport::{ChannelEvent, ChannelLink, OpenRequest, Outgoing, Transport},
};

/// Requests from the façade.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    /// Transmit `frame`, or dispatch `fallback` locally if no channel is
    /// live by the time the command is processed.
    Send { frame: ClientFrame, fallback: Option<InboundEvent> },
    Join(ConversationId),
    Leave(ConversationId),
    /// Dispatch a locally produced event.
    Report(InboundEvent),
    Teardown { done: oneshot::Sender<()> },
}

/// Events produced by tasks the driver spawned.
#[derive(Debug)]
enum Internal {
    Opened { channel: ChannelId, link: ChannelLink },
    OpenFailed { channel: ChannelId, reason: String },
    Channel { channel: ChannelId, event: ChannelEvent },
    RetryDue { retry: RetryId },
}

/// The open channel.
struct LiveChannel {
    id: ChannelId,
    outbound: mpsc::UnboundedSender<Outgoing>,
    pump: JoinHandle<()>,
}

/// Collaborators the driver reads at connect time.
pub(crate) struct Inputs {
    pub tokens: Arc<dyn TokenSource>,
    pub routes: Arc<dyn RouteAwareness>,
}

pub(crate) struct Driver<E: Environment> {
    env: E,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    inputs: Inputs,
    connection: Connection<E::Instant>,
    dispatcher: Dispatcher,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    live: Option<LiveChannel>,
    opening: Option<(ChannelId, JoinHandle<()>)>,
    retry_timer: Option<(RetryId, JoinHandle<()>)>,
    /// Conversations to re-join after a reconnect.
    joined: BTreeSet<ConversationId>,
}

impl<E: Environment> Driver<E> {
    pub(crate) fn new(
        env: E,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        inputs: Inputs,
        dispatcher: Dispatcher,
        state: watch::Sender<ConnectionState>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let connection = Connection::new(config.connection);

        Self {
            env,
            config,
            transport,
            inputs,
            connection,
            dispatcher,
            state,
            commands,
            internal_tx,
            internal_rx,
            live: None,
            opening: None,
            retry_timer: None,
            joined: BTreeSet::new(),
        }
    }

    /// Run until teardown or until every façade handle is dropped.
    pub(crate) async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                Some(event) = self.internal_rx.recv() => self.handle_internal(event),
                command = self.commands.recv() => match command {
                    Some(Command::Teardown { done }) => {
                        self.shutdown();
                        let _ = done.send(());
                        break;
                    },
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        break;
                    },
                },
                _ = ticker.tick() => {
                    let actions = self.connection.tick(self.env.now());
                    self.execute(actions);
                },
            }
        }

        tracing::debug!("driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                let ctx = self.connect_context();
                let actions = self.connection.connect(ctx, self.env.now());
                self.execute(actions);
            },
            Command::Disconnect => {
                tracing::info!("manual disconnect");
                self.joined.clear();
                self.dispatcher.reset_identity();
                let actions = self.connection.disconnect();
                self.execute(actions);
            },
            Command::Send { frame, fallback } => self.send_or_report(frame, fallback),
            Command::Join(conversation_id) => {
                let frame = ClientFrame::JoinConversation(ConversationRef {
                    conversation_id: conversation_id.clone(),
                });
                if self.transmit(frame) {
                    self.joined.insert(conversation_id);
                }
            },
            Command::Leave(conversation_id) => {
                let was_joined = self.joined.remove(&conversation_id);
                if self.connection.is_connected() {
                    self.transmit(ClientFrame::LeaveConversation(ConversationRef {
                        conversation_id,
                    }));
                } else {
                    tracing::debug!(%conversation_id, was_joined, "left while offline");
                }
            },
            Command::Report(event) => {
                self.dispatcher.dispatch(&event);
            },
            Command::Teardown { .. } => {},
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        let now = self.env.now();
        match event {
            Internal::Opened { channel, link } => self.channel_opened(channel, link),
            Internal::OpenFailed { channel, reason } => {
                if self.opening.as_ref().is_some_and(|(id, _)| *id == channel) {
                    self.opening = None;
                }
                let actions = self.connection.channel_failed(channel, reason, now);
                self.execute(actions);
            },
            Internal::Channel { channel, event } => self.channel_event(channel, event),
            Internal::RetryDue { retry } => {
                if self.retry_timer.as_ref().is_some_and(|(id, _)| *id == retry) {
                    self.retry_timer = None;
                }
                let ctx = self.connect_context();
                let actions = self.connection.retry_elapsed(retry, ctx, now);
                self.execute(actions);
            },
        }
    }

    fn channel_opened(&mut self, channel: ChannelId, link: ChannelLink) {
        if self.opening.as_ref().is_some_and(|(id, _)| *id == channel) {
            self.opening = None;
        }

        if self.connection.channel() != Some(channel) {
            tracing::debug!(%channel, "closing stale channel");
            let _ = link.outbound.send(Outgoing::Close);
            return;
        }

        let ChannelLink { outbound, mut inbound } = link;
        let internal = self.internal_tx.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                let last = matches!(event, ChannelEvent::Closed { .. });
                if internal.send(Internal::Channel { channel, event }).is_err() || last {
                    return;
                }
            }
            let _ = internal.send(Internal::Channel {
                channel,
                event: ChannelEvent::Closed { reason: "link dropped".to_string() },
            });
        });

        tracing::debug!(%channel, "channel open, awaiting handshake");
        self.live = Some(LiveChannel { id: channel, outbound, pump });
    }

    fn channel_event(&mut self, channel: ChannelId, event: ChannelEvent) {
        let now = self.env.now();
        match event {
            ChannelEvent::Frame(ServerFrame::Connected(ack)) => {
                let was_connected = self.connection.is_connected();
                let actions = self.connection.handshake_acknowledged(channel, ack.session_id, now);
                self.execute(actions);

                if !was_connected && self.connection.is_connected() {
                    tracing::info!(%channel, "connected");
                    self.rejoin();
                }
            },
            ChannelEvent::Frame(ServerFrame::ConnectError(rejection)) => {
                let actions = self.connection.handshake_rejected(channel, rejection.message, now);
                self.execute(actions);
            },
            ChannelEvent::Frame(ServerFrame::Event(event)) => {
                if self.connection.frame_received(channel, now) {
                    let report = self.dispatcher.dispatch(&event);
                    tracing::trace!(kind = %event.kind(), ?report, "dispatched");
                } else {
                    let kind = event.kind();
                    tracing::debug!(%channel, %kind, "dropping event: channel inactive");
                }
            },
            ChannelEvent::Heartbeat => {
                self.connection.frame_received(channel, now);
            },
            ChannelEvent::Closed { reason } => {
                let actions = self.connection.channel_closed(channel, reason, now);
                self.execute(actions);
            },
        }
    }

    fn execute(&mut self, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::OpenChannel { channel, token } => {
                    let request = OpenRequest { channel, url: self.config.ws_url(&token), token };
                    let transport = Arc::clone(&self.transport);
                    let internal = self.internal_tx.clone();

                    let task = tokio::spawn(async move {
                        let event = match transport.open(request).await {
                            Ok(link) => Internal::Opened { channel, link },
                            Err(e) => Internal::OpenFailed { channel, reason: e.to_string() },
                        };
                        let _ = internal.send(event);
                    });

                    if let Some((_, previous)) = self.opening.replace((channel, task)) {
                        previous.abort();
                    }
                },
                ConnectionAction::CloseChannel { channel, reason } => {
                    tracing::debug!(%channel, %reason, "closing channel");
                    if self.live.as_ref().is_some_and(|live| live.id == channel)
                        && let Some(live) = self.live.take()
                    {
                        let _ = live.outbound.send(Outgoing::Close);
                        live.pump.abort();
                    }
                    if self.opening.as_ref().is_some_and(|(id, _)| *id == channel)
                        && let Some((_, task)) = self.opening.take()
                    {
                        task.abort();
                    }
                },
                ConnectionAction::SendHeartbeat { channel } => {
                    if let Some(live) = self.live.as_ref().filter(|live| live.id == channel) {
                        let _ = live.outbound.send(Outgoing::Ping);
                    }
                },
                ConnectionAction::ScheduleRetry { retry, delay } => {
                    let env = self.env.clone();
                    let internal = self.internal_tx.clone();
                    let timer = tokio::spawn(async move {
                        env.sleep(delay).await;
                        let _ = internal.send(Internal::RetryDue { retry });
                    });

                    if let Some((_, previous)) = self.retry_timer.replace((retry, timer)) {
                        previous.abort();
                    }
                },
                ConnectionAction::CancelRetry { retry } => {
                    if self.retry_timer.as_ref().is_some_and(|(id, _)| *id == retry)
                        && let Some((_, timer)) = self.retry_timer.take()
                    {
                        timer.abort();
                    }
                },
                ConnectionAction::StateChanged { to, .. } => {
                    if to == ConnectionState::Disconnected
                        && let Some(live) = self.live.take()
                    {
                        live.pump.abort();
                    }
                    self.state.send_replace(to);
                },
            }
        }
    }

    /// Transmit on the live channel. Returns whether the frame was queued.
    fn transmit(&self, frame: ClientFrame) -> bool {
        match (self.connection.ensure_connected(), &self.live) {
            (Ok(channel), Some(live)) if live.id == channel => {
                if live.outbound.send(Outgoing::Frame(frame)).is_ok() {
                    true
                } else {
                    tracing::warn!(%channel, "channel writer gone; frame dropped");
                    false
                }
            },
            (Err(e), _) => {
                tracing::warn!(event = frame.event_name(), "{}; frame dropped", e);
                false
            },
            (Ok(channel), _) => {
                tracing::warn!(%channel, event = frame.event_name(), "no live link; frame dropped");
                false
            },
        }
    }

    fn send_or_report(&mut self, frame: ClientFrame, fallback: Option<InboundEvent>) {
        if !self.transmit(frame)
            && let Some(event) = fallback
        {
            self.dispatcher.dispatch(&event);
        }
    }

    fn rejoin(&self) {
        if self.joined.is_empty() {
            return;
        }

        tracing::info!(count = self.joined.len(), "re-joining conversations");
        for conversation_id in &self.joined {
            self.transmit(ClientFrame::JoinConversation(ConversationRef {
                conversation_id: conversation_id.clone(),
            }));
        }
    }

    fn connect_context(&self) -> ConnectContext {
        ConnectContext {
            token: self.inputs.tokens.bearer_token(),
            on_auth_route: self.config.auth_routes.is_current_auth_only(&*self.inputs.routes),
        }
    }

    fn shutdown(&mut self) {
        let actions = self.connection.disconnect();
        self.execute(actions);

        if let Some((_, task)) = self.opening.take() {
            task.abort();
        }
        if let Some((_, timer)) = self.retry_timer.take() {
            timer.abort();
        }

        self.joined.clear();
        self.dispatcher.reset_identity();
        self.dispatcher.registry().clear();
        tracing::info!("client torn down");
    }
}
