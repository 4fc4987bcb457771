//! Production Environment implementation using Tokio time and OS entropy.

use std::time::Duration;

use chatwire_core::Environment;

/// Production environment.
///
/// Time comes from `tokio::time::Instant`, so a paused Tokio clock in tests
/// drives the connection timers as well as the retry sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> tokio::time::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).unwrap_or_else(|e| {
            // Correlation IDs stay unique through their sequence suffix.
            tracing::error!("getrandom failed: {}", e);
            buffer.fill(0);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_differ() {
        let env = SystemEnv::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        env.random_bytes(&mut a);
        env.random_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_follows_tokio_clock() {
        let env = SystemEnv::new();
        let start = env.now();
        env.sleep(Duration::from_secs(3)).await;
        assert!(env.now() - start >= Duration::from_secs(3));
    }
}
