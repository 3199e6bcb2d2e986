//! Authentication channel payload types.
//!
//! The exchange, from the client's point of view:
//!
//! ```text
//! client                                   server
//!   │ OpenChannel { client_cookie }          │
//!   │───────────────────────────────────────>│
//!   │         ChannelResult { server_cookie }│
//!   │<───────────────────────────────────────│
//!   │ Proof { public_key, signature }        │
//!   │───────────────────────────────────────>│
//!   │       AuthResult { accepted, known }   │
//!   │<───────────────────────────────────────│
//! ```

use serde::{Deserialize, Serialize};

/// Channel type string identifying the hidden-service authentication channel.
pub const AUTH_CHANNEL_TYPE: &str = "im.burrow.auth.hidden-service";

/// Length of the client and server cookies in bytes.
pub const COOKIE_LEN: usize = 16;

/// Request to open an authentication channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenChannel {
    /// Requested channel type; must be [`AUTH_CHANNEL_TYPE`]
    pub channel_type: String,
    /// Random cookie contributed by the client
    pub client_cookie: [u8; COOKIE_LEN],
}

/// Server answer to [`OpenChannel`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelResult {
    /// Whether the channel was opened
    pub opened: bool,
    /// Random cookie contributed by the server (present when opened)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub server_cookie: Option<[u8; COOKIE_LEN]>,
    /// Reason for refusal (present when not opened)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub common_error: Option<String>,
}

/// Client identity proof
///
/// # Security
///
/// - **Debug Redaction**: the signature is redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Client public key (32 bytes, Ed25519)
    pub public_key: Vec<u8>,
    /// Signature over the proof transcript (64 bytes)
    pub signature: Vec<u8>,
}

impl std::fmt::Debug for Proof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proof")
            .field("public_key", &self.public_key.len())
            .field("signature", &format!("<redacted {} bytes>", self.signature.len()))
            .finish()
    }
}

/// Server verdict on a [`Proof`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether authentication was accepted
    pub accepted: bool,
    /// Whether the client is a known contact
    pub is_known_contact: bool,
}
