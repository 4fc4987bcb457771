//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples the client from system resources (clock,
//! timers, randomness). The production driver uses Tokio time and OS entropy;
//! the simulation harness substitutes a virtual clock and a seeded RNG, so
//! reconnect timing and correlation IDs are reproducible.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::{fmt::Debug, future::Future, ops::Sub, time::Duration};

/// Abstract environment providing time, timers and randomness.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Point in time as measured by this environment.
    ///
    /// Only differences between instants are meaningful.
    type Instant: Copy + Ord + Debug + Send + Sync + Sub<Output = Duration> + 'static;

    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: Subsequent calls must return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Used by the driver for retry timers only; the state machine itself
    /// never sleeps.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
