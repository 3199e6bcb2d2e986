//! Frame header implementation with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 16-byte structure serialized as raw binary
//! (Big Endian). The connection loop only needs the header to know how many
//! payload bytes to wait for, so it is parsed without touching the payload.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Fixed 16-byte frame header (Big Endian network byte order)
///
/// ```text
/// 0       4    5    6      8            12           16
/// ┌───────┬────┬────┬──────┬────────────┬────────────┐
/// │ magic │ver │rsvd│opcode│ channel_id │payload_size│
/// └───────┴────┴────┴──────┴────────────┴────────────┘
/// ```
///
/// Fields are stored as raw byte arrays so that every 16-byte pattern is a
/// valid value; validation happens in [`FrameHeader::from_bytes`].
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    magic: [u8; 4],                   // 0x42525257 ("BRRW")
    version: u8,                      // 0x01
    reserved: u8,                     // must be zero on send, ignored on receive
    pub(crate) opcode: [u8; 2],       // u16 operation code
    channel_id: [u8; 4],              // u32 logical channel
    pub(crate) payload_size: [u8; 4], // u32 payload length
}

impl FrameHeader {
    /// Size of the serialized header (16 bytes)
    pub const SIZE: usize = 16;

    /// Magic number: "BRRW" in ASCII (0x42525257)
    pub const MAGIC: u32 = 0x4252_5257;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (64 KiB). Authentication frames are tiny; anything
    /// bigger is a misbehaving peer.
    pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024;

    /// Create a new header with the specified opcode on channel 0.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            reserved: 0,
            opcode: opcode.to_u16().to_be_bytes(),
            channel_id: [0; 4],
            payload_size: [0; 4],
        }
    }

    /// Parse header from network bytes (zero-copy, safe)
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if:
    /// - Buffer is too short (< 16 bytes)
    /// - Magic number is invalid
    /// - Protocol version is unsupported
    /// - Payload size exceeds maximum
    ///
    /// # Security
    ///
    /// Cheapest checks run first (size, magic) so garbage input fails fast.
    /// The payload size limit is enforced here, before any buffer is grown to
    /// hold the payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes
    #[must_use]
    #[allow(clippy::wrong_self_convention)]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Get the magic number
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Get the protocol version
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Get the opcode
    #[must_use]
    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.opcode)
    }

    /// Get the opcode as an enum (if valid)
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode())
    }

    /// Get the channel ID
    #[must_use]
    pub fn channel_id(&self) -> u32 {
        u32::from_be_bytes(self.channel_id)
    }

    /// Set the channel ID
    pub fn set_channel_id(&mut self, channel_id: u32) {
        self.channel_id = channel_id.to_be_bytes();
    }

    /// Get the payload size
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("version", &self.version())
            .field("opcode", &format!("{:#06x}", self.opcode()))
            .field("channel_id", &self.channel_id())
            .field("payload_size", &self.payload_size())
            .finish()
    }
}
