//! Production Environment implementation using system time and RNG.

use std::time::Duration;

use tavern_core::Environment;

/// Production environment: `std::time::Instant`, tokio sleep, OS
/// cryptographic RNG via getrandom.
///
/// # Panics
///
/// Panics if the OS RNG fails. A broker without functioning cryptographic
/// randomness cannot mint unguessable player and connection IDs, so
/// continuing would be worse than stopping.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("OS RNG failure is unrecoverable");
    }
}
