//! Operation codes for Burrow frames.
//!
//! The authentication channel lives entirely in the `0x0000-0x00FF` range.
//! Later protocol stages (contact requests, chat) allocate their own ranges
//! and never reuse these values.

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Frame operation codes
///
/// Opcodes are serialized as Big Endian `u16` values in the frame header.
/// The `#[repr(u16)]` ensures stable numeric values for wire compatibility.
///
/// # Security
///
/// - **Unknown Opcodes**: `from_u16` returns `None` for unknown values rather
///   than panicking. Frames with unknown opcodes must be rejected with
///   [`ProtocolError::InvalidOpcode`](crate::ProtocolError::InvalidOpcode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u16)]
pub enum Opcode {
    /// Client asks the server to open an authentication channel
    OpenChannel = 0x0001,
    /// Server answer to `OpenChannel`, carrying the server cookie
    ChannelResult = 0x0002,
    /// Client identity proof
    Proof = 0x0003,
    /// Server verdict on the proof
    AuthResult = 0x0004,
    /// Either side closes the authentication channel
    CloseChannel = 0x0005,
    /// Error frame
    Error = 0x00FF,
}

impl Opcode {
    /// Convert to raw u16 value
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Convert from raw u16 value
    ///
    /// Returns `None` if the value doesn't correspond to a known opcode.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::OpenChannel),
            0x0002 => Some(Self::ChannelResult),
            0x0003 => Some(Self::Proof),
            0x0004 => Some(Self::AuthResult),
            0x0005 => Some(Self::CloseChannel),
            0x00FF => Some(Self::Error),
            _ => None,
        }
    }
}
