//! Deterministic simulation harness for Burrow handshake testing.
//!
//! This crate provides Turmoil-based implementations of the `Environment`
//! and `Transport` traits, plus a scenario API that runs the inbound
//! handshake against scripted peers over a simulated network.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scenario;
pub mod sim_env;
pub mod sim_transport;

pub use sim_env::SimEnv;
pub use sim_transport::SimTransport;
