//! Turmoil-based Environment implementation for deterministic testing.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use burrow_core::{env::Environment, identity::Identity};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Simulation environment using Turmoil's virtual time and a seeded RNG.
///
/// - **Virtual time**: `now()` and `sleep()` follow the simulated clock of
///   the Turmoil host they run on.
/// - **Seeded RNG**: `random_bytes()` draws from ChaCha20, so cookies and
///   generated identities repeat exactly for the same seed.
///
/// Clones share one RNG stream, so two clones never hand out the same bytes.
///
/// # Usage
///
/// Time operations must run inside a Turmoil simulation (or any Tokio
/// runtime with the time driver enabled).
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Create a new SimEnv with the default seed (0).
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Create a new SimEnv with a specific seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }

    /// Generate an identity from this environment's RNG stream.
    pub fn identity(&self) -> Identity {
        Identity::generate(self)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, dest: &mut [u8]) {
        // A poisoned lock still holds a usable RNG
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(dest);
    }
}
