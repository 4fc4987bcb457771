//! Inbound event dispatcher.
//!
//! Decides per event whether the notification sink fires, then fans the
//! event out through the [`ListenerRegistry`]. Runs on the driver task, so
//! events are dispatched one at a time in arrival order.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use chatwire_proto::{InboundEvent, Message, UserId};

use crate::{
    notify::NotificationSink,
    registry::{ListenerRegistry, panic_message},
    session::TokenSource,
};

/// What happened while dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    /// Whether the notification sink was invoked.
    pub notified: bool,
    /// Listeners that returned normally.
    pub delivered: usize,
    /// Listeners that panicked.
    pub panicked: usize,
}

/// Routes inbound events to the notification sink and subscribers.
pub struct Dispatcher {
    registry: Arc<ListenerRegistry>,
    sink: Arc<dyn NotificationSink>,
    tokens: Arc<dyn TokenSource>,
    /// Cached after the first successful resolution.
    current_user: Option<UserId>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("current_user", &self.current_user)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher delivering to `registry`.
    pub fn new(
        registry: Arc<ListenerRegistry>,
        sink: Arc<dyn NotificationSink>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self { registry, sink, tokens, current_user: None }
    }

    /// Registry this dispatcher delivers to.
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Cached current-user ID, if resolved.
    pub fn current_user(&self) -> Option<UserId> {
        self.current_user
    }

    /// Forget the cached current-user ID.
    ///
    /// Called on manual disconnect and teardown, since the next session may
    /// belong to someone else.
    pub fn reset_identity(&mut self) {
        self.current_user = None;
    }

    /// Dispatch one event.
    pub fn dispatch(&mut self, event: &InboundEvent) -> DispatchReport {
        let notified = match event {
            InboundEvent::NewMessage(message) => self.maybe_notify(message),
            _ => false,
        };

        let delivery = self.registry.dispatch(event);
        DispatchReport { notified, delivered: delivery.delivered, panicked: delivery.panicked }
    }

    /// Invoke the sink unless the message is provably self-authored.
    fn maybe_notify(&mut self, message: &Message) -> bool {
        let current = self.resolve_user();
        if current == Some(message.sender.id) {
            tracing::trace!(message = %message.id, "suppressing notification for own message");
            return false;
        }

        let sink = &self.sink;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            sink.notify(&message.content, &message.sender.name, Some(message.sender.id));
        }));
        if let Err(payload) = result {
            tracing::error!(panic = panic_message(&*payload), "notification sink panicked");
        }
        true
    }

    fn resolve_user(&mut self) -> Option<UserId> {
        if self.current_user.is_none() {
            let token = self.tokens.bearer_token()?;
            match token.user_id() {
                Ok(id) => self.current_user = Some(id),
                Err(error) => tracing::debug!(%error, "cannot resolve current user"),
            }
        }
        self.current_user
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use chatwire_proto::{EventKind, Sender, UserTyping};
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::session::{BearerToken, SharedToken};

    type Notes = Arc<Mutex<Vec<(String, String, Option<UserId>)>>>;

    fn token_for(user: UserId) -> BearerToken {
        let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"id":{user}}}"#));
        BearerToken::new(format!("h.{claims}.s"))
    }

    fn message_from(sender: UserId) -> InboundEvent {
        InboundEvent::NewMessage(Message {
            id: "m-1".into(),
            conversation_id: "c1".into(),
            sender: Sender { id: sender, name: "Ana".into() },
            recipient_id: None,
            content: "hello".into(),
            attachment: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            read_at: None,
        })
    }

    fn dispatcher(tokens: SharedToken) -> (Dispatcher, Notes) {
        let notes: Notes = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let notes = Arc::clone(&notes);
            move |content: &str, name: &str, id: Option<UserId>| {
                notes.lock().unwrap().push((content.to_string(), name.to_string(), id));
            }
        };
        (Dispatcher::new(ListenerRegistry::new(), Arc::new(sink), Arc::new(tokens)), notes)
    }

    #[test]
    fn own_message_is_not_notified() {
        let (mut dispatcher, notes) = dispatcher(SharedToken::with_token(token_for(7)));
        let seen = Arc::new(Mutex::new(0));
        {
            let seen = Arc::clone(&seen);
            dispatcher.registry().subscribe(EventKind::NewMessage, move |_| {
                *seen.lock().unwrap() += 1;
            });
        }

        let report = dispatcher.dispatch(&message_from(7));

        assert!(!report.notified);
        assert_eq!(report.delivered, 1);
        assert!(notes.lock().unwrap().is_empty());
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn foreign_message_notifies_once() {
        let (mut dispatcher, notes) = dispatcher(SharedToken::with_token(token_for(42)));

        let report = dispatcher.dispatch(&message_from(7));

        assert!(report.notified);
        assert_eq!(*notes.lock().unwrap(), [("hello".to_string(), "Ana".to_string(), Some(7))]);
    }

    #[test]
    fn unresolvable_user_still_notifies() {
        let (mut opaque, notes) = dispatcher(SharedToken::with_token(BearerToken::new("x")));
        assert!(opaque.dispatch(&message_from(7)).notified);
        assert_eq!(opaque.current_user(), None);
        assert_eq!(notes.lock().unwrap().len(), 1);

        let (mut signed_out, notes) = dispatcher(SharedToken::new());
        assert!(signed_out.dispatch(&message_from(7)).notified);
        assert_eq!(notes.lock().unwrap().len(), 1);
    }

    #[test]
    fn identity_is_cached_until_reset() {
        let tokens = SharedToken::with_token(token_for(7));
        let (mut dispatcher, _) = dispatcher(tokens.clone());

        dispatcher.dispatch(&message_from(1));
        assert_eq!(dispatcher.current_user(), Some(7));

        tokens.set(token_for(8));
        assert!(!dispatcher.dispatch(&message_from(7)).notified);

        dispatcher.reset_identity();
        assert!(dispatcher.dispatch(&message_from(7)).notified);
        assert_eq!(dispatcher.current_user(), Some(8));
    }

    #[test]
    fn other_kinds_never_notify() {
        let (mut dispatcher, notes) = dispatcher(SharedToken::with_token(token_for(7)));
        let event = InboundEvent::UserTyping(UserTyping {
            conversation_id: "c1".into(),
            user_id: 9,
            user_name: None,
            is_typing: true,
        });

        assert_eq!(dispatcher.dispatch(&event), DispatchReport::default());
        assert!(notes.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_sink_does_not_block_listeners() {
        struct Broken;
        impl NotificationSink for Broken {
            fn notify(&self, _: &str, _: &str, _: Option<UserId>) {
                panic!("toast failed");
            }
        }

        let mut dispatcher = Dispatcher::new(
            ListenerRegistry::new(),
            Arc::new(Broken),
            Arc::new(SharedToken::with_token(token_for(1))),
        );
        dispatcher.registry().subscribe(EventKind::NewMessage, |_| {});

        let report = dispatcher.dispatch(&message_from(2));
        assert!(report.notified);
        assert_eq!(report.delivered, 1);
    }
}
