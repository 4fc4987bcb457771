//! Fuzz target for the [`Connection`] lifecycle state machine.
//!
//! # Strategy
//!
//! - Operation sequences: connects, disconnects, timer firings, transport
//!   failures, handshake outcomes and time advances in any order
//! - Staleness: events aimed at the previous channel or retry
//! - Credentials and routes: toggled between operations
//!
//! # Invariants
//!
//! - The real machine emits exactly the actions the reference model does
//! - A channel exists iff the state is not `Disconnected`
//! - At most one retry is pending, and only while `Disconnected`
//! - No retry is pending after a manual disconnect
//! - NEVER panic
//!
//! [`Connection`]: chatwire_core::Connection

#![no_main]

use chatwire_core::{ConnectionConfig, ConnectionState};
use chatwire_harness::{ModelWorld, Operation, RealWorld};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|ops: Vec<Operation>| {
    let config = ConnectionConfig::default();
    let mut model = ModelWorld::new(&config);
    let mut real = RealWorld::new(config);

    for op in ops.iter().take(512) {
        assert_eq!(model.apply(op), real.apply(op), "divergence on {op:?}");

        let state = real.observable_state();
        assert_eq!(state, model.observable_state());
        assert_eq!(state.channel.is_some(), state.state != ConnectionState::Disconnected);
        if state.pending_retry.is_some() {
            assert_eq!(state.state, ConnectionState::Disconnected);
            assert!(!state.manual);
        }
    }
});
