//! Command façade.
//!
//! [`MessagingClient`] is the handle the application holds. It is cheap to
//! clone; all clones talk to the same driver task. Commands are queued and
//! return immediately. Outbound sends fail fast with
//! [`CommandError::NotConnected`] when the published state is not
//! `Connected`, and the failure is also reported to the matching error
//! subscribers.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use chatwire_core::{
    ConnectionState, Dispatcher, Environment, ListenerRegistry, LogNotificationSink, NoRoute,
    NotificationSink, RouteAwareness, Subscription, TokenSource,
};
use chatwire_proto::{
    ClientFrame, ConversationId, ConversationUpdated, CorrelationId, EventKind, InboundEvent,
    MarkAsRead, MarkReadError, Message, MessageError, MessageId, MessageRead, MessageSent,
    OutboundMessageIntent, SendMessage, Typing, UserTyping,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    config::ClientConfig,
    driver::{Command, Driver, Inputs},
    error::{ClientError, CommandError},
    system_env::SystemEnv,
    transport::{Transport, websocket::WsTransport},
};

/// Application-supplied collaborators.
#[derive(Clone)]
pub struct Collaborators {
    /// Current bearer credential.
    pub tokens: Arc<dyn TokenSource>,
    /// Toast surface for incoming messages.
    pub notifications: Arc<dyn NotificationSink>,
    /// Current navigation path.
    pub routes: Arc<dyn RouteAwareness>,
}

impl Collaborators {
    /// Collaborators with log-only notifications and no routes.
    pub fn new(tokens: impl TokenSource + 'static) -> Self {
        Self {
            tokens: Arc::new(tokens),
            notifications: Arc::new(LogNotificationSink),
            routes: Arc::new(NoRoute),
        }
    }

    /// Use `sink` for incoming-message notifications.
    #[must_use]
    pub fn with_notifications(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.notifications = Arc::new(sink);
        self
    }

    /// Use `routes` to detect authentication pages.
    #[must_use]
    pub fn with_routes(mut self, routes: impl RouteAwareness + 'static) -> Self {
        self.routes = Arc::new(routes);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

struct Inner {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    registry: Arc<ListenerRegistry>,
    correlation_prefix: String,
    next_correlation: AtomicU64,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one client context.
#[derive(Clone)]
pub struct MessagingClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MessagingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingClient")
            .field("state", &self.state())
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl MessagingClient {
    /// Create a client context over the WebSocket transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn init_websocket(
        config: ClientConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ClientError> {
        Self::init(config, collaborators, WsTransport::new())
    }

    /// Create a client context and spawn its driver task.
    ///
    /// The client starts `Disconnected`; call [`MessagingClient::connect`].
    /// Must be called from within a Tokio runtime.
    pub fn init(
        config: ClientConfig,
        collaborators: Collaborators,
        transport: impl Transport,
    ) -> Result<Self, ClientError> {
        Self::init_with_env(config, collaborators, transport, SystemEnv::new())
    }

    /// Like [`MessagingClient::init`] with an explicit environment.
    pub fn init_with_env<E: Environment>(
        config: ClientConfig,
        collaborators: Collaborators,
        transport: impl Transport,
        env: E,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let registry = ListenerRegistry::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            collaborators.notifications,
            Arc::clone(&collaborators.tokens),
        );
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let correlation_prefix = format!("{:016x}", env.random_u64());

        let driver = Driver::new(
            env,
            config,
            Arc::new(transport),
            Inputs { tokens: collaborators.tokens, routes: collaborators.routes },
            dispatcher,
            state_tx,
            commands_rx,
        );
        let handle = tokio::spawn(driver.run());

        tracing::debug!(prefix = %correlation_prefix, "client initialised");
        Ok(Self {
            inner: Arc::new(Inner {
                commands: commands_tx,
                state: state_rx,
                registry,
                correlation_prefix,
                next_correlation: AtomicU64::new(1),
                driver: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Destroy the client context.
    ///
    /// Closes the channel, cancels any pending retry, removes every listener
    /// and stops the driver. Subsequent commands return
    /// [`CommandError::Closed`], and listeners registered afterwards are
    /// never invoked. Idempotent.
    pub async fn teardown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.inner.commands.send(Command::Teardown { done: done_tx }).is_ok() {
            let _ = done_rx.await;
        }

        let handle = self.inner.driver.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!("driver task failed: {}", e);
        }
    }

    /// Ask the driver to connect.
    ///
    /// Silently does nothing while a channel exists, without a credential, or
    /// on an authentication route. Never blocks; observe progress with
    /// [`MessagingClient::state`] or [`MessagingClient::wait_for_state`].
    pub fn connect(&self) -> Result<(), CommandError> {
        self.command(Command::Connect)
    }

    /// Close the channel and stop reconnecting until the next
    /// [`MessagingClient::connect`].
    pub fn disconnect(&self) -> Result<(), CommandError> {
        self.command(Command::Disconnect)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether outbound frames can be sent right now.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Wait until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ClientError> {
        let mut state = self.inner.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Closed)
    }

    /// Send a message.
    ///
    /// Returns the correlation ID echoed in the matching `message_sent` or
    /// `message_error`. Does not wait for the acknowledgement.
    pub fn send_message(
        &self,
        intent: OutboundMessageIntent,
    ) -> Result<CorrelationId, CommandError> {
        let correlation_id = self.next_correlation_id();
        let fallback =
            InboundEvent::MessageError(MessageError::not_connected(correlation_id.clone()));
        let frame =
            ClientFrame::SendMessage(SendMessage::from_intent(intent, correlation_id.clone()));

        self.submit(frame, fallback)?;
        Ok(correlation_id)
    }

    /// Mark a message as read.
    pub fn mark_read(
        &self,
        message_id: impl Into<MessageId>,
    ) -> Result<CorrelationId, CommandError> {
        let message_id = message_id.into();
        let correlation_id = self.next_correlation_id();
        let fallback = InboundEvent::MarkReadError(MarkReadError::not_connected(
            message_id.clone(),
            correlation_id.clone(),
        ));
        let frame = ClientFrame::MarkAsRead(MarkAsRead {
            message_id,
            correlation_id: correlation_id.clone(),
        });

        self.submit(frame, fallback)?;
        Ok(correlation_id)
    }

    /// Start receiving a conversation's events.
    ///
    /// No-op with a warning when not connected. Joined conversations are
    /// re-joined after every automatic reconnect.
    pub fn join_conversation(&self, conversation_id: impl Into<ConversationId>) {
        let conversation_id = conversation_id.into();
        if self.warn_unless_connected("join_conversation") {
            self.fire(Command::Join(conversation_id));
        }
    }

    /// Stop receiving a conversation's events.
    ///
    /// Always forgets the conversation, so it is not re-joined after a
    /// reconnect. The `leave_conversation` frame is only sent when connected.
    pub fn leave_conversation(&self, conversation_id: impl Into<ConversationId>) {
        self.warn_unless_connected("leave_conversation");
        self.fire(Command::Leave(conversation_id.into()));
    }

    /// Send a typing indicator.
    pub fn send_typing(&self, conversation_id: impl Into<ConversationId>, is_typing: bool) {
        let frame =
            ClientFrame::Typing(Typing { conversation_id: conversation_id.into(), is_typing });
        if self.warn_unless_connected(frame.event_name()) {
            self.fire(Command::Send { frame, fallback: None });
        }
    }

    /// Subscribe to incoming messages.
    pub fn on_new_message<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.listen(EventKind::NewMessage, move |event| {
            if let InboundEvent::NewMessage(message) = event {
                listener(message);
            }
        })
    }

    /// Subscribe to send acknowledgements.
    pub fn on_message_sent<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&MessageSent) + Send + Sync + 'static,
    {
        self.listen(EventKind::MessageSent, move |event| {
            if let InboundEvent::MessageSent(sent) = event {
                listener(sent);
            }
        })
    }

    /// Subscribe to send failures, including local `not_connected` ones.
    pub fn on_message_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&MessageError) + Send + Sync + 'static,
    {
        self.listen(EventKind::MessageError, move |event| {
            if let InboundEvent::MessageError(error) = event {
                listener(error);
            }
        })
    }

    /// Subscribe to read receipts.
    pub fn on_message_read<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&MessageRead) + Send + Sync + 'static,
    {
        self.listen(EventKind::MessageRead, move |event| {
            if let InboundEvent::MessageRead(read) = event {
                listener(read);
            }
        })
    }

    /// Subscribe to conversation metadata changes.
    pub fn on_conversation_updated<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConversationUpdated) + Send + Sync + 'static,
    {
        self.listen(EventKind::ConversationUpdated, move |event| {
            if let InboundEvent::ConversationUpdated(update) = event {
                listener(update);
            }
        })
    }

    /// Subscribe to typing indicators.
    pub fn on_user_typing<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&UserTyping) + Send + Sync + 'static,
    {
        self.listen(EventKind::UserTyping, move |event| {
            if let InboundEvent::UserTyping(typing) = event {
                listener(typing);
            }
        })
    }

    /// Subscribe to mark-as-read failures, including local `not_connected`
    /// ones.
    pub fn on_mark_read_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&MarkReadError) + Send + Sync + 'static,
    {
        self.listen(EventKind::MarkReadError, move |event| {
            if let InboundEvent::MarkReadError(error) = event {
                listener(error);
            }
        })
    }

    /// Register on the live registry, or on a detached one once the driver
    /// has stopped.
    fn listen<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        if self.inner.commands.is_closed() {
            tracing::debug!(%kind, "client is closed; listener will never be invoked");
            return ListenerRegistry::new().subscribe(kind, listener);
        }
        self.inner.registry.subscribe(kind, listener)
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.registry.listener_count(kind)
    }

    fn next_correlation_id(&self) -> CorrelationId {
        let n = self.inner.next_correlation.fetch_add(1, Ordering::Relaxed);
        CorrelationId::new(format!("{}-{n}", self.inner.correlation_prefix))
    }

    /// Queue `frame` if connected; otherwise report `fallback` and fail.
    fn submit(&self, frame: ClientFrame, fallback: InboundEvent) -> Result<(), CommandError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            tracing::warn!(event = frame.event_name(), %state, "not connected; nothing sent");
            self.command(Command::Report(fallback))?;
            return Err(CommandError::NotConnected { state });
        }

        self.command(Command::Send { frame, fallback: Some(fallback) })
    }

    fn warn_unless_connected(&self, event: &str) -> bool {
        let state = self.state();
        if state == ConnectionState::Connected {
            true
        } else {
            tracing::warn!(event, %state, "not connected; ignoring");
            false
        }
    }

    fn command(&self, command: Command) -> Result<(), CommandError> {
        self.inner.commands.send(command).map_err(|_| CommandError::Closed)
    }

    fn fire(&self, command: Command) {
        if self.command(command).is_err() {
            tracing::debug!("client is closed; command dropped");
        }
    }
}
