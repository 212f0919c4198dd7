//! Environment abstraction for deterministic testing.
//!
//! Decouples the coordination loop from system resources (time,
//! randomness) so driver logic can run under tests with a fixed clock and
//! seeded identities, and in production against the OS clock and RNG.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async sleep.
///
/// Implementations must guarantee that `now()` never goes backwards within
/// one execution context and that `random_bytes()` is cryptographically
/// secure in production (minted player IDs and connection IDs must be
/// unguessable).
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Sleep for the given duration.
    ///
    /// The only async method in the trait; used by runtime glue (retry
    /// timers, replay pacing), never by driver logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill the buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `u64`, for connection IDs.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Random `u128`, for minted player IDs.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }
}

pub mod testing {
    //! A deterministic environment for driver tests.

    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Instant,
    };

    use super::*;

    /// Counter-backed environment: "random" bytes come from an
    /// incrementing counter so minted identities are predictable, and
    /// sleeps complete immediately.
    #[derive(Debug, Clone, Default)]
    pub struct SeededEnv {
        counter: Arc<AtomicU64>,
    }

    impl Environment for SeededEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            std::future::ready(())
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            for chunk in buffer.chunks_mut(8) {
                let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
                chunk.copy_from_slice(&n.to_be_bytes()[..chunk.len()]);
            }
        }
    }

}
