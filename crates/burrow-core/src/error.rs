//! Error types for connection processing.
//!
//! [`ConnectionError`] is what the processing loop and frame handlers return.
//! The handshake coordinator classifies it into a
//! [`HandshakeOutcome`](crate::handshake::HandshakeOutcome): timeouts become
//! `Timeout`, everything else becomes `ConnectionError`.
//!
//! We avoid using `std::io::Error` for protocol logic to keep the
//! classification exhaustive and testable.

use std::{fmt, io, time::Duration};

use crate::auth::AuthState;

/// Errors that can occur while processing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The bounded-time policy's deadline elapsed
    Timeout {
        /// How long the action ran before it was abandoned
        elapsed: Duration,
    },

    /// Connection closed by the peer or by a handler
    Closed(String),

    /// Received a frame the auth channel does not expect in its current state
    UnexpectedFrame {
        /// Auth channel state when the frame arrived
        state: AuthState,
        /// Opcode of the unexpected frame
        opcode: u16,
    },

    /// Payload decoded but violates the auth channel's rules
    InvalidPayload {
        /// What was expected
        expected: &'static str,
        /// Opcode of the offending frame
        opcode: u16,
    },

    /// Protocol error from frame parsing/validation
    Protocol(String),

    /// Underlying transport error
    Transport(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed } => write!(f, "timed out after {:?}", elapsed),
            Self::Closed(reason) => write!(f, "connection closed: {}", reason),
            Self::UnexpectedFrame { state, opcode } => {
                write!(f, "unexpected frame: received opcode {:#06x} in state {:?}", opcode, state)
            },
            Self::InvalidPayload { expected, opcode } => {
                write!(f, "invalid payload: expected {} for opcode {:#06x}", expected, opcode)
            },
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl ConnectionError {
    /// Returns true if this error came from the bounded-time policy.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectionError::Timeout { .. })
    }
}

/// Convert ConnectionError to io::Error for compatibility with async I/O APIs.
impl From<ConnectionError> for io::Error {
    fn from(err: ConnectionError) -> Self {
        let kind = match &err {
            ConnectionError::Timeout { .. } => io::ErrorKind::TimedOut,
            ConnectionError::Closed(_) => io::ErrorKind::ConnectionAborted,
            ConnectionError::UnexpectedFrame { .. }
            | ConnectionError::InvalidPayload { .. }
            | ConnectionError::Protocol(_) => io::ErrorKind::InvalidData,
            ConnectionError::Transport(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err.to_string())
    }
}

impl From<burrow_proto::ProtocolError> for ConnectionError {
    fn from(err: burrow_proto::ProtocolError) -> Self {
        ConnectionError::Protocol(err.to_string())
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Transport(err.to_string())
    }
}
