//! Scenario testing framework for deterministic simulation tests.
//!
//! This module provides a declarative API for scenario-based tests that
//! follow the Oracle Pattern: a scenario runs one inbound handshake between a
//! scripted client and a real server inside Turmoil, and an oracle verifies
//! the resulting [`World`].

mod builder;
pub mod oracle;
pub mod peer;
mod world;

pub use builder::{RunnableScenario, Scenario};
pub use oracle::OracleFn;
pub use peer::{PeerBehavior, PeerReport};
pub use world::{DecisionCall, ServerStats, World};
