//! Fuzz target for listener registration and dispatch.
//!
//! Interleaves subscriptions, unsubscriptions (including from inside a
//! running listener) and dispatches, and checks delivery counts against a
//! plain list of live registrations.
//!
//! # Invariants
//!
//! - A dispatch reaches exactly the listeners registered when it started
//! - Unsubscribing twice is harmless

#![no_main]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use arbitrary::Arbitrary;
use chatwire_core::{ListenerRegistry, Subscription};
use chatwire_proto::{EventKind, InboundEvent, UserTyping};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Step {
    Subscribe { self_removing: bool },
    Unsubscribe { index: u8 },
    Dispatch,
}

fn typing() -> InboundEvent {
    InboundEvent::UserTyping(UserTyping {
        conversation_id: "c".into(),
        user_id: 1,
        user_name: None,
        is_typing: true,
    })
}

fuzz_target!(|steps: Vec<Step>| {
    let registry = ListenerRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut live: Vec<(Subscription, bool)> = Vec::new();

    for step in steps.into_iter().take(256) {
        match step {
            Step::Subscribe { self_removing } => {
                let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
                let counter = Arc::clone(&calls);
                let own = Arc::clone(&slot);
                let sub = registry.subscribe(EventKind::UserTyping, move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if self_removing && let Some(sub) = own.lock().unwrap().take() {
                        sub.unsubscribe();
                    }
                });
                *slot.lock().unwrap() = Some(sub.clone());
                live.push((sub, self_removing));
            },
            Step::Unsubscribe { index } => {
                if !live.is_empty() {
                    let (sub, _) = live.remove(usize::from(index) % live.len());
                    sub.unsubscribe();
                    sub.unsubscribe();
                }
            },
            Step::Dispatch => {
                let expected = registry.listener_count(EventKind::UserTyping);
                let before = calls.load(Ordering::SeqCst);
                let delivery = registry.dispatch(&typing());

                assert_eq!(calls.load(Ordering::SeqCst) - before, expected);
                assert_eq!(delivery.delivered, expected);
                assert_eq!(delivery.panicked, 0);

                live.retain(|(_, self_removing)| !self_removing);
                assert_eq!(registry.listener_count(EventKind::UserTyping), live.len());
            },
        }
    }
});
