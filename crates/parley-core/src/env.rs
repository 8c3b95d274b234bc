//! Environment abstraction for deterministic testing.
//!
//! Protocol logic never reads the clock or the OS RNG directly. Production
//! code plugs in real resources, simulation plugs in a virtual clock and a
//! seeded RNG, and the same driver code runs under both.

use std::time::Duration;

/// Time, randomness and async sleep.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses OS entropy in production and a seeded generator in
///   simulation
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant type.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Wall-clock milliseconds since the Unix epoch.
    ///
    /// Used only to stamp messages for display. Ordering decisions use
    /// [`Environment::now`].
    fn wall_clock_millis(&self) -> u64;

    /// Sleep for `duration`.
    ///
    /// The only async method. Runtimes use it for retry delays; Sans-IO state
    /// machines never call it.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `u64`, e.g. for connection identifiers.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
