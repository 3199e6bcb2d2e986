//! Inbound authentication handshake.
//!
//! [`InboundConnectionHandler::process_auth_as_server`] drives one server-side
//! authentication attempt on a freshly accepted [`Connection`] and reports a
//! single [`HandshakeOutcome`].
//!
//! # Join
//!
//! Two tasks cooperate per attempt:
//!
//! ```text
//!  caller task                               watcher task
//!  ───────────                               ────────────
//!  policy.execute(connection.process(h))     waiter.wait()
//!     │  frames ─> ServerAuthHandler ──result──>  │
//!     │                                           ↓
//!     │                                      slot.set(result)
//!     │<───────────────── interrupt() ───────────┘
//!     ↓
//!  abort + join watcher, clear interrupt, read slot
//! ```
//!
//! The slot is written before the interrupt is issued, and read only after
//! `process` has returned, so a `Success` always carries the result the
//! decision callback produced. A processing error (including the policy's
//! timeout) always wins over whatever the slot holds.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    auth::{AcceptPolicy, AuthResult, ProofVerifier, ServerAuthHandler},
    connection::Connection,
    env::Environment,
    error::ConnectionError,
    identity::Identity,
    policy::TimeoutPolicy,
};

/// Local misconfiguration detected before any network activity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No private key was supplied
    #[error("private key not set")]
    PrivateKeyNotSet,
}

/// Failed handshake, for callers that prefer `Result`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Local configuration is unusable
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Peer completed the exchange but was not accepted
    #[error("authentication rejected")]
    Rejected(AuthResult),

    /// Deadline elapsed before authentication completed
    #[error("authentication timed out after {elapsed:?}")]
    Timeout {
        /// Time spent before giving up
        elapsed: Duration,
    },

    /// Processing loop failed
    #[error(transparent)]
    Connection(ConnectionError),
}

impl From<ConnectionError> for HandshakeError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Timeout { elapsed } => HandshakeError::Timeout { elapsed },
            other => HandshakeError::Connection(other),
        }
    }
}

/// Terminal outcome of one inbound handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Peer authenticated and accepted
    Success(AuthResult),
    /// Peer refused by the decision callback or by proof verification
    RejectedByPolicy(AuthResult),
    /// Deadline elapsed first
    Timeout {
        /// Time spent before giving up
        elapsed: Duration,
    },
    /// Local misconfiguration; no I/O was performed
    ConfigurationError(ConfigError),
    /// Processing loop failed
    ConnectionError(ConnectionError),
}

/// Discriminant of [`HandshakeOutcome`] without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// See [`HandshakeOutcome::Success`]
    Success,
    /// See [`HandshakeOutcome::RejectedByPolicy`]
    RejectedByPolicy,
    /// See [`HandshakeOutcome::Timeout`]
    Timeout,
    /// See [`HandshakeOutcome::ConfigurationError`]
    ConfigurationError,
    /// See [`HandshakeOutcome::ConnectionError`]
    ConnectionError,
}

impl HandshakeOutcome {
    /// Outcome class.
    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        match self {
            HandshakeOutcome::Success(_) => OutcomeKind::Success,
            HandshakeOutcome::RejectedByPolicy(_) => OutcomeKind::RejectedByPolicy,
            HandshakeOutcome::Timeout { .. } => OutcomeKind::Timeout,
            HandshakeOutcome::ConfigurationError(_) => OutcomeKind::ConfigurationError,
            HandshakeOutcome::ConnectionError(_) => OutcomeKind::ConnectionError,
        }
    }

    /// True only for `Success`. Callers must close the connection otherwise.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, HandshakeOutcome::Success(_))
    }

    /// Convert into a `Result`, keeping the accepted [`AuthResult`].
    ///
    /// # Errors
    ///
    /// Every outcome other than `Success`.
    pub fn into_result(self) -> Result<AuthResult, HandshakeError> {
        match self {
            HandshakeOutcome::Success(result) => Ok(result),
            HandshakeOutcome::RejectedByPolicy(result) => Err(HandshakeError::Rejected(result)),
            HandshakeOutcome::Timeout { elapsed } => Err(HandshakeError::Timeout { elapsed }),
            HandshakeOutcome::ConfigurationError(err) => Err(HandshakeError::Configuration(err)),
            HandshakeOutcome::ConnectionError(err) => Err(HandshakeError::Connection(err)),
        }
    }
}

/// Runs the server side of the authentication handshake on an inbound
/// connection.
///
/// Holds the connection mutably for its whole lifetime, so no other handler
/// can be processing it concurrently.
pub struct InboundConnectionHandler<'c, R, W, E> {
    connection: &'c mut Connection<R, W>,
    env: E,
    timeout_policy: TimeoutPolicy,
    verifier: Option<Box<dyn ProofVerifier>>,
}

impl<'c, R, W, E> InboundConnectionHandler<'c, R, W, E>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    E: Environment,
{
    /// Borrow `connection` for one handshake, with the unknown-purpose
    /// timeout policy.
    pub fn new(connection: &'c mut Connection<R, W>, env: E) -> Self {
        Self { connection, env, timeout_policy: TimeoutPolicy::unknown_purpose(), verifier: None }
    }

    /// Override the timeout policy.
    #[must_use]
    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    /// Override the proof verifier used by the auth channel.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Box<dyn ProofVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Authenticate the peer as a server.
    ///
    /// `accept_policy` decides on the peer once its proof has verified; it
    /// runs at most once. With `identity == None` this returns
    /// `ConfigurationError` without touching the connection or spawning
    /// anything.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn process_auth_as_server<P: AcceptPolicy>(
        self,
        identity: Option<&Identity>,
        accept_policy: P,
    ) -> HandshakeOutcome {
        let Some(identity) = identity else {
            tracing::warn!("inbound handshake refused: private key not set");
            return HandshakeOutcome::ConfigurationError(ConfigError::PrivateKeyNotSet);
        };

        let Self { connection, env, timeout_policy, verifier } = self;

        let (mut handler, waiter) = ServerAuthHandler::new(
            env.clone(),
            identity.clone(),
            connection.remote_hostname().map(str::to_owned),
        );
        if let Some(verifier) = verifier {
            handler = handler.with_verifier(verifier);
        }
        handler.set_server_authorization_hook(accept_policy);

        let slot: Arc<OnceLock<AuthResult>> = Arc::new(OnceLock::new());
        let watcher = tokio::spawn({
            let slot = Arc::clone(&slot);
            let interrupter = connection.interrupter();
            async move {
                if let Some(result) = waiter.wait().await {
                    if slot.set(result).is_err() {
                        tracing::error!("auth result slot written twice");
                    }
                    interrupter.interrupt();
                }
            }
        });

        tracing::debug!(
            local = identity.hostname(),
            deadline = ?timeout_policy.deadline(),
            "inbound handshake authenticating"
        );

        let processed = timeout_policy.execute(&env, connection.process(&mut handler)).await;

        drop(handler);
        watcher.abort();
        match watcher.await {
            Err(err) if err.is_panic() => tracing::error!(%err, "auth result watcher panicked"),
            _ => {},
        }
        connection.clear_interrupt();

        let outcome = match processed {
            Ok(()) => match slot.get().cloned() {
                Some(result) if result.accepted => HandshakeOutcome::Success(result),
                Some(result) => HandshakeOutcome::RejectedByPolicy(result),
                None => {
                    tracing::error!("processing loop interrupted without an auth result");
                    HandshakeOutcome::RejectedByPolicy(AuthResult::rejected(None))
                },
            },
            Err(ConnectionError::Timeout { elapsed }) => {
                tracing::warn!(?elapsed, "inbound handshake timed out");
                HandshakeOutcome::Timeout { elapsed }
            },
            Err(err) => {
                tracing::warn!(%err, "inbound handshake failed");
                HandshakeOutcome::ConnectionError(err)
            },
        };

        tracing::debug!(outcome = ?outcome.kind(), "inbound handshake reported");
        outcome
    }
}
