//! CBOR-encoded frame payloads.
//!
//! Each opcode has a corresponding payload type. The `Payload` enum provides
//! type-safe payload handling with CBOR serialization.
//!
//! # Security Properties
//!
//! - **Bounded Deserialization**: payloads are checked against
//!   [`FrameHeader::MAX_PAYLOAD_SIZE`] before CBOR parsing begins.
//!
//! - **Explicit Schema**: each payload type has an explicit Rust struct. There
//!   is no generic map parsing that could accept unexpected shapes.

pub mod auth;

use bytes::BufMut;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads
///
/// The payload type is determined by the `Opcode` in the frame header, so
/// only the inner struct is serialized (no variant tag in CBOR). This keeps
/// a peer from sending a mismatched opcode/payload pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Open an authentication channel
    OpenChannel(auth::OpenChannel),
    /// Answer to `OpenChannel`
    ChannelResult(auth::ChannelResult),
    /// Client identity proof
    Proof(auth::Proof),
    /// Server verdict
    AuthResult(auth::AuthResult),
    /// Close the authentication channel
    CloseChannel,
    /// Error response
    Error(ErrorPayload),
}

/// Error payload for error frames
///
/// # Security
///
/// Messages MUST NOT carry internal details (paths, key material, stack
/// traces).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code
    pub code: u16,
    /// Human-readable error message
    pub message: String,
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl Payload {
    /// Get the opcode for this payload variant
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::OpenChannel(_) => Opcode::OpenChannel,
            Self::ChannelResult(_) => Opcode::ChannelResult,
            Self::Proof(_) => Opcode::Proof,
            Self::AuthResult(_) => Opcode::AuthResult,
            Self::CloseChannel => Opcode::CloseChannel,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode payload to buffer
    ///
    /// Serializes only the inner struct, NOT the variant tag.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::CborEncode`] if serialization fails.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::OpenChannel(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::ChannelResult(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Proof(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::AuthResult(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::CloseChannel => Ok(()), // Zero-byte payload
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode payload from bytes based on opcode
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `bytes.len() > MAX_PAYLOAD_SIZE`
    /// - CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::OpenChannel => Self::OpenChannel(from_cbor(bytes)?),
            Opcode::ChannelResult => Self::ChannelResult(from_cbor(bytes)?),
            Opcode::Proof => Self::Proof(from_cbor(bytes)?),
            Opcode::AuthResult => Self::AuthResult(from_cbor(bytes)?),
            Opcode::CloseChannel => Self::CloseChannel,
            Opcode::Error => Self::Error(from_cbor(bytes)?),
        };

        Ok(payload)
    }

    /// Convert payload into a transport frame
    ///
    /// Encodes the payload, sets the opcode in the header, and lets
    /// [`Frame::new`] compute the payload size.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.opcode = self.opcode().to_u16().to_be_bytes();
        Ok(Frame::new(header, buf))
    }

    /// Parse payload from a raw transport frame
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidOpcode`] for unknown opcodes, or the
    /// decoding error from [`Payload::decode`].
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::InvalidOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}
