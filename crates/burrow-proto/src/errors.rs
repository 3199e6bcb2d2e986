//! Framing failures on the authentication channel.
//!
//! Header problems are reported before any payload byte is looked at; the
//! remaining variants come from the CBOR layer or from opcode dispatch.

use thiserror::Error;

/// Why a frame could not be built or parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes than a [`FrameHeader`](crate::FrameHeader) needs
    #[error("need {expected} header bytes, have {actual}")]
    FrameTooShort {
        /// Header size
        expected: usize,
        /// Bytes on hand
        actual: usize,
    },

    /// First four bytes are not `BRRW`
    #[error("not a burrow frame: magic must be \"BRRW\"")]
    InvalidMagic,

    /// Header version this build does not speak
    #[error("burrow frame version {0} not supported")]
    UnsupportedVersion(u8),

    /// Declared or actual payload over the 64 KiB frame limit
    #[error("payload of {size} bytes over the {max}-byte frame limit")]
    PayloadTooLarge {
        /// Offending size
        size: usize,
        /// [`FrameHeader::MAX_PAYLOAD_SIZE`](crate::FrameHeader::MAX_PAYLOAD_SIZE)
        max: usize,
    },

    /// Stream ended inside the payload the header announced
    #[error("payload cut short: announced {expected} bytes, got {actual}")]
    FrameTruncated {
        /// `payload_size` from the header
        expected: usize,
        /// Bytes that followed the header
        actual: usize,
    },

    /// Payload struct could not be written as CBOR
    #[error("payload encode: {0}")]
    CborEncode(String),

    /// Payload bytes are not the CBOR shape the opcode requires
    #[error("payload decode: {0}")]
    CborDecode(String),

    /// Opcode outside the auth channel's set
    #[error("unknown opcode {0:#06x}")]
    InvalidOpcode(u16),
}

/// Result of a framing operation.
pub type Result<T> = std::result::Result<T, ProtocolError>;
