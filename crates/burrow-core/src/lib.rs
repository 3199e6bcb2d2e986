//! Burrow connection core
//!
//! This crate authenticates inbound peer connections. A freshly accepted
//! connection is driven through a bounded-time authentication exchange, the
//! peer is accepted or refused by a caller-supplied policy, and a single
//! [`HandshakeOutcome`] is handed back so normal processing can begin or the
//! connection can be torn down.
//!
//! # Architecture: "The Hollow Shell"
//!
//! Protocol decisions live in sans-IO handlers; the connection loop and the
//! handshake coordinator are the only async code:
//!
//! ```text
//!      ┌──────────────────────────────────┐
//!      │ burrow-core                      │
//!      │ - ServerAuthHandler (sans-IO)    │
//!      │ - Connection processing loop     │
//!      │ - TimeoutPolicy                  │
//!      │ - Handshake coordinator          │
//!      └──────────────────────────────────┘
//!         ↓                      ↓
//! ┌────────────────┐  ┌──────────────────┐
//! │ burrow-harness │  │ production       │
//! │ (Turmoil)      │  │ (Tokio streams)  │
//! │ - Virtual time │  │ - Real network   │
//! │ - Seeded RNG   │  │ - System clock   │
//! └────────────────┘  └──────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - Time and randomness come from the [`Environment`] trait, never from
//!   `Instant::now()` or `thread_rng()`
//! - Handlers return actions; only [`Connection`] touches the stream
//! - Every handshake returns exactly one outcome
//!
//! # Modules
//!
//! - [`auth`]: Server side of the authentication channel
//! - [`connection`]: Frame processing loop and interrupts
//! - [`env`]: Environment abstraction (time, RNG)
//! - [`error`]: Connection error types
//! - [`handshake`]: Inbound handshake coordinator
//! - [`identity`]: Keys and hostnames
//! - [`policy`]: Bounded-time execution
//! - [`transport`]: Transport abstraction (streams)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod connection;
pub mod env;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod policy;
pub mod transport;

pub use auth::{AcceptDecision, AcceptPolicy, AuthResult, AuthState, PeerIdentity};
pub use connection::{Connection, ConnectionAction, FrameHandler, Interrupter};
pub use env::{Environment, SystemEnv};
pub use error::ConnectionError;
pub use handshake::{
    ConfigError, HandshakeError, HandshakeOutcome, InboundConnectionHandler, OutcomeKind,
};
pub use identity::Identity;
pub use policy::{PolicyConfig, TimeoutPolicy};
