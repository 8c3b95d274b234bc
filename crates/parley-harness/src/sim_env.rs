//! Seeded environment with a virtual clock.
//!
//! Time only moves when someone calls [`SimEnv::advance`] or sleeps, so runs
//! are reproducible from the seed alone.

use std::{
    ops::Sub,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parley_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Wall clock reading at virtual time zero (2024-01-01T00:00:00Z).
const EPOCH_MILLIS: u64 = 1_704_067_200_000;

/// Point on the virtual clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since the simulation started.
    pub fn elapsed_since_start(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

/// Deterministic [`Environment`].
///
/// Clones share the clock and the RNG.
#[derive(Clone)]
pub struct SimEnv {
    clock_nanos: Arc<AtomicU64>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimEnv {
    /// Environment seeded with `seed`, clock at zero.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            clock_nanos: Arc::new(AtomicU64::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.clock_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Uniform value in `0..bound`. `bound` must be non-zero.
    pub fn below(&self, bound: u64) -> u64 {
        debug_assert!(bound > 0);
        self.random_u64() % bound.max(1)
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> Self::Instant {
        SimInstant(Duration::from_nanos(self.clock_nanos.load(Ordering::SeqCst)))
    }

    fn wall_clock_millis(&self) -> u64 {
        EPOCH_MILLIS + self.now().0.as_millis() as u64
    }

    /// Advances the clock instead of waiting, then yields once.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        let env = self.clone();
        async move {
            env.advance(duration);
            tokio::task::yield_now().await;
        }
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
