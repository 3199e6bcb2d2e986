//! # Burrow Protocol: Wire Format
//!
//! This crate implements the binary framing for the Burrow authentication
//! channel, the first exchange on every inbound peer connection.
//!
//! ## Protocol Design
//!
//! - **FrameHeader**: 16 bytes of raw binary (Big Endian), parsed zero-copy
//!   with [`zerocopy`](https://docs.rs/zerocopy)
//! - **Payload**: Variable-length CBOR-encoded structured data
//!
//! ## Security Properties
//!
//! - **No Unsafe Deserialization**: header parsing uses `zerocopy` with
//!   compile-time layout verification. Malformed frames are rejected before
//!   any payload is copied.
//!
//! - **Size Limits**: payloads are capped at 64 KiB. The connection loop
//!   checks the header before buffering the payload.
//!
//! - **Explicit Validation**: all parsing returns `Result`; unknown opcodes
//!   are errors.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod header;
pub mod opcodes;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcodes::Opcode;
pub use payloads::Payload;
