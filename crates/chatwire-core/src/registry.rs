//! Per-kind listener registry.
//!
//! Listeners are registered under one [`EventKind`] and invoked in
//! registration order. Dispatch iterates a snapshot of the list taken under
//! the lock, so a listener may subscribe or unsubscribe (itself or others)
//! while being invoked without affecting the delivery in progress.
//!
//! A listener that panics is logged and skipped; the remaining listeners for
//! that event still run.

use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use chatwire_proto::{EventKind, InboundEvent};

/// Subscriber callback.
pub type Listener = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Identity of one registration. Registering the same closure twice yields
/// two distinct IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Outcome of delivering one event to its listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    /// Listeners that returned normally.
    pub delivered: usize,
    /// Listeners that panicked.
    pub panicked: usize,
}

/// Listener registry keyed by event kind.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<EventKind, usize> =
            self.lock().iter().map(|(kind, list)| (*kind, list.len())).collect();
        f.debug_struct("ListenerRegistry").field("listeners", &counts).finish()
    }
}

impl ListenerRegistry {
    /// Empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `listener` for `kind`.
    ///
    /// The returned [`Subscription`] removes exactly this registration.
    /// Dropping it without calling [`Subscription::unsubscribe`] leaves the
    /// listener registered.
    pub fn subscribe<F>(self: &Arc<Self>, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().entry(kind).or_default().push((id, Arc::new(listener)));
        tracing::trace!(%kind, ?id, "listener registered");

        Subscription { registry: Arc::downgrade(self), kind, id }
    }

    /// Remove one registration. Returns whether it was present.
    pub fn remove(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let Some(list) = listeners.get_mut(&kind) else {
            return false;
        };

        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;

        if list.is_empty() {
            listeners.remove(&kind);
        }
        removed
    }

    /// Current listeners for `kind`, in registration order.
    pub fn snapshot(&self, kind: EventKind) -> Vec<Listener> {
        self.lock()
            .get(&kind)
            .map(|list| list.iter().map(|(_, listener)| Arc::clone(listener)).collect())
            .unwrap_or_default()
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Invoke every listener registered for the event's kind.
    ///
    /// The lock is not held while listeners run.
    pub fn dispatch(&self, event: &InboundEvent) -> Delivery {
        let kind = event.kind();
        let mut delivery = Delivery::default();

        for listener in self.snapshot(kind) {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivery.delivered += 1,
                Err(payload) => {
                    delivery.panicked += 1;
                    tracing::error!(%kind, panic = panic_message(&*payload), "listener panicked");
                },
            }
        }

        delivery
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<(ListenerId, Listener)>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

/// Handle to one registration.
///
/// Holds the registry weakly: unsubscribing after the client is torn down is
/// a no-op.
#[derive(Debug, Clone)]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    kind: EventKind,
    id: ListenerId,
}

impl Subscription {
    /// Kind this subscription is registered under.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Registration identity.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the registration. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade()
            && registry.remove(self.kind, self.id)
        {
            tracing::trace!(kind = %self.kind, id = ?self.id, "listener removed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chatwire_proto::UserTyping;
    use proptest::prelude::*;

    use super::*;

    fn typing() -> InboundEvent {
        InboundEvent::UserTyping(UserTyping {
            conversation_id: "c1".into(),
            user_id: 3,
            user_name: None,
            is_typing: true,
        })
    }

    fn recorder(
        log: &Arc<Mutex<Vec<&'static str>>>,
        tag: &'static str,
    ) -> impl Fn(&InboundEvent) + Send + Sync + use<> {
        let log = Arc::clone(log);
        move |_| log.lock().unwrap().push(tag)
    }

    #[test]
    fn delivers_in_registration_order() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe(EventKind::UserTyping, recorder(&log, "a"));
        registry.subscribe(EventKind::UserTyping, recorder(&log, "b"));
        registry.subscribe(EventKind::NewMessage, recorder(&log, "other"));

        let delivery = registry.dispatch(&typing());
        assert_eq!(delivery, Delivery { delivered: 2, panicked: 0 });
        assert_eq!(*log.lock().unwrap(), ["a", "b"]);
    }

    #[test]
    fn same_closure_twice_is_two_registrations() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let listener = {
            let calls = Arc::clone(&calls);
            move |_: &InboundEvent| {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        };

        let first = registry.subscribe(EventKind::UserTyping, listener.clone());
        registry.subscribe(EventKind::UserTyping, listener);
        registry.dispatch(&typing());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        first.unsubscribe();
        registry.dispatch(&typing());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = ListenerRegistry::new();
        let sub = registry.subscribe(EventKind::UserTyping, |_| {});
        let other = registry.subscribe(EventKind::UserTyping, |_| {});

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(registry.listener_count(EventKind::UserTyping), 1);

        other.unsubscribe();
        assert_eq!(registry.listener_count(EventKind::UserTyping), 0);
    }

    #[test]
    fn unsubscribe_after_registry_dropped() {
        let registry = ListenerRegistry::new();
        let sub = registry.subscribe(EventKind::UserTyping, |_| {});
        drop(registry);
        sub.unsubscribe();
    }

    #[test]
    fn panicking_listener_is_isolated() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe(EventKind::UserTyping, recorder(&log, "before"));
        registry.subscribe(EventKind::UserTyping, |_| panic!("listener bug"));
        registry.subscribe(EventKind::UserTyping, recorder(&log, "after"));

        let delivery = registry.dispatch(&typing());
        assert_eq!(delivery, Delivery { delivered: 2, panicked: 1 });
        assert_eq!(*log.lock().unwrap(), ["before", "after"]);

        // Registry remains usable.
        assert_eq!(registry.dispatch(&typing()).panicked, 1);
    }

    #[test]
    fn self_unsubscribe_during_dispatch() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let sub = {
            let slot = Arc::clone(&slot);
            let log = Arc::clone(&log);
            registry.subscribe(EventKind::UserTyping, move |_| {
                log.lock().unwrap().push("once");
                if let Some(sub) = slot.lock().unwrap().take() {
                    sub.unsubscribe();
                }
            })
        };
        *slot.lock().unwrap() = Some(sub);
        registry.subscribe(EventKind::UserTyping, recorder(&log, "stays"));

        registry.dispatch(&typing());
        registry.dispatch(&typing());

        assert_eq!(*log.lock().unwrap(), ["once", "stays", "stays"]);
    }

    #[test]
    fn subscribe_during_dispatch_applies_to_next_event() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        {
            let weak = Arc::downgrade(&registry);
            let log = Arc::clone(&log);
            registry.subscribe(EventKind::UserTyping, move |_| {
                if let Some(registry) = weak.upgrade()
                    && registry.listener_count(EventKind::UserTyping) == 1
                {
                    registry.subscribe(EventKind::UserTyping, recorder(&log, "late"));
                }
            });
        }

        assert_eq!(registry.dispatch(&typing()).delivered, 1);
        assert!(log.lock().unwrap().is_empty());

        assert_eq!(registry.dispatch(&typing()).delivered, 2);
        assert_eq!(*log.lock().unwrap(), ["late"]);
    }

    #[test]
    fn clear_removes_everything() {
        let registry = ListenerRegistry::new();
        for kind in EventKind::ALL {
            registry.subscribe(kind, |_| {});
        }

        registry.clear();
        for kind in EventKind::ALL {
            assert_eq!(registry.listener_count(kind), 0);
        }
        assert_eq!(registry.dispatch(&typing()), Delivery::default());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe,
        Unsubscribe(usize),
        Dispatch,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Subscribe),
            2 => any::<usize>().prop_map(Op::Unsubscribe),
            2 => Just(Op::Dispatch),
        ]
    }

    proptest! {
        /// Every dispatch reaches exactly the live registrations, in order.
        #[test]
        fn dispatch_matches_registration_list(ops in prop::collection::vec(op(), 0..64)) {
            let registry = ListenerRegistry::new();
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut live: Vec<(usize, Subscription)> = Vec::new();
            let mut next = 0;

            for op in ops {
                match op {
                    Op::Subscribe => {
                        let tag = next;
                        next += 1;
                        let log = Arc::clone(&log);
                        let sub = registry.subscribe(EventKind::UserTyping, move |_| {
                            log.lock().unwrap().push(tag);
                        });
                        live.push((tag, sub));
                    },
                    Op::Unsubscribe(index) if !live.is_empty() => {
                        let (_, sub) = live.remove(index % live.len());
                        sub.unsubscribe();
                    },
                    Op::Unsubscribe(_) => {},
                    Op::Dispatch => {
                        log.lock().unwrap().clear();
                        let delivery = registry.dispatch(&typing());

                        let expected: Vec<usize> = live.iter().map(|(tag, _)| *tag).collect();
                        prop_assert_eq!(&*log.lock().unwrap(), &expected);
                        prop_assert_eq!(delivery.delivered, expected.len());
                    },
                }
                prop_assert_eq!(registry.listener_count(EventKind::UserTyping), live.len());
            }
        }
    }

    #[test]
    fn panic_payload_text() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom 1");
    }
}
