//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples handshake logic from system resources
//! (time, randomness). The same handshake code runs against:
//!
//! - `SimEnv` (burrow-harness): Turmoil's virtual clock and a seeded RNG
//! - [`SystemEnv`]: the Tokio clock and the OS entropy pool
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: implementations must not share global state

use std::time::Duration;

use burrow_proto::payloads::auth::COOKIE_LEN;
use rand::{RngCore, rngs::OsRng};

/// Abstract environment providing time, randomness, and sleeping.
///
/// # Type Parameters
///
/// - `Instant`: a point in time. Must be `Copy`, ordered, and support
///   subtraction to compute elapsed time for timeout reporting.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. RNG quality: `random_bytes()` uses cryptographically secure entropy in
///    production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Type representing a point in time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Returns the current time.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code (timeout policies) awaits this. State machines never
    /// sleep.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a fresh authentication cookie.
    fn random_cookie(&self) -> [u8; COOKIE_LEN] {
        let mut cookie = [0u8; COOKIE_LEN];
        self.random_bytes(&mut cookie);
        cookie
    }
}

/// Production environment: Tokio clock, OS entropy.
///
/// Time comes from `tokio::time::Instant`, so a paused Tokio runtime (as in
/// `#[tokio::test(start_paused = true)]`) drives it virtually.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        OsRng.fill_bytes(buffer);
    }
}
