//! Bounded-time execution policies.
//!
//! A [`TimeoutPolicy`] races an action against a deadline measured on the
//! [`Environment`] clock. When the deadline wins, the action's future is
//! dropped and [`ConnectionError::Timeout`] is returned. Dropping the future
//! is what aborts an in-flight processing loop, so actions must be
//! cancel-safe at their await points.
//!
//! # Presets
//!
//! - [`TimeoutPolicy::unknown_purpose`]: 15 seconds. Used while a connection
//!   has not yet established what it is for (authentication in progress).
//! - [`TimeoutPolicy::known_purpose`]: 3 minutes. Used once a connection has an
//!   established purpose.

use std::{future::Future, time::Duration};

use serde::Deserialize;

use crate::{env::Environment, error::ConnectionError};

/// Deadline for connections whose purpose is not yet established.
pub const UNKNOWN_PURPOSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Deadline for connections with an established purpose.
pub const KNOWN_PURPOSE_TIMEOUT: Duration = Duration::from_secs(180);

/// Executes an action under a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    deadline: Duration,
}

impl TimeoutPolicy {
    /// Policy for connections that have not yet established a purpose.
    #[must_use]
    pub const fn unknown_purpose() -> Self {
        Self { deadline: UNKNOWN_PURPOSE_TIMEOUT }
    }

    /// Policy for connections with an established purpose.
    #[must_use]
    pub const fn known_purpose() -> Self {
        Self { deadline: KNOWN_PURPOSE_TIMEOUT }
    }

    /// Policy with an explicit deadline.
    #[must_use]
    pub const fn with_deadline(deadline: Duration) -> Self {
        Self { deadline }
    }

    /// The configured deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run `action` to completion or until the deadline elapses.
    ///
    /// The action's own error is returned unchanged. If the deadline wins,
    /// returns [`ConnectionError::Timeout`] with the elapsed time on the
    /// environment clock. When both are ready at the same poll, the deadline
    /// wins.
    ///
    /// # Errors
    ///
    /// Whatever `action` returns, or `Timeout`.
    pub async fn execute<E, F, T>(&self, env: &E, action: F) -> Result<T, ConnectionError>
    where
        E: Environment,
        F: Future<Output = Result<T, ConnectionError>>,
    {
        let started = env.now();

        tokio::select! {
            biased;
            () = env.sleep(self.deadline) => {
                let elapsed = env.now() - started;
                tracing::debug!(?elapsed, deadline = ?self.deadline, "timeout policy expired");
                Err(ConnectionError::Timeout { elapsed })
            },
            result = action => result,
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::unknown_purpose()
    }
}

/// Timeout configuration as loaded from a configuration file.
///
/// Missing fields fall back to the preset deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Deadline in seconds for connections without an established purpose
    pub unknown_purpose_secs: u64,
    /// Deadline in seconds for connections with an established purpose
    pub known_purpose_secs: u64,
}

impl PolicyConfig {
    /// Policy applied while authenticating.
    #[must_use]
    pub fn unknown_purpose(&self) -> TimeoutPolicy {
        TimeoutPolicy::with_deadline(Duration::from_secs(self.unknown_purpose_secs))
    }

    /// Policy applied after the connection's purpose is known.
    #[must_use]
    pub fn known_purpose(&self) -> TimeoutPolicy {
        TimeoutPolicy::with_deadline(Duration::from_secs(self.known_purpose_secs))
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            unknown_purpose_secs: UNKNOWN_PURPOSE_TIMEOUT.as_secs(),
            known_purpose_secs: KNOWN_PURPOSE_TIMEOUT.as_secs(),
        }
    }
}
