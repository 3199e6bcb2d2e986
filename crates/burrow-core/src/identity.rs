//! Node identity: Ed25519 keys and the hostnames derived from them.
//!
//! A Burrow hostname is the lowercase hex encoding of the first
//! [`HOSTNAME_BYTES`] bytes of `SHA-256(public_key)`. Peers are addressed by
//! hostname, so the mapping must be stable across versions.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::env::Environment;

/// Number of digest bytes encoded into a hostname.
pub const HOSTNAME_BYTES: usize = 10;

/// Errors from decoding key material.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Key bytes had the wrong length
    #[error("invalid key length: expected {expected}, found {found}")]
    InvalidKeyLength {
        /// Required length
        expected: usize,
        /// Supplied length
        found: usize,
    },

    /// Bytes are not a valid Ed25519 public key
    #[error("invalid public key")]
    InvalidPublicKey,
}

/// This node's durable identity.
///
/// Holds the private key; `Debug` never prints it.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    hostname: String,
}

impl Identity {
    /// Build an identity from a 32-byte secret seed.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let hostname = hostname_for(&signing_key.verifying_key());
        Self { signing_key, hostname }
    }

    /// Build an identity from stored secret key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidKeyLength`] unless `bytes` is exactly
    /// 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidKeyLength { expected: 32, found: bytes.len() })?;
        Ok(Self::from_seed(seed))
    }

    /// Generate a fresh identity from the environment's RNG.
    pub fn generate<E: Environment>(env: &E) -> Self {
        let mut seed = [0u8; 32];
        env.random_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Public half of the key pair.
    #[must_use]
    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Hostname derived from the public key.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Sign a message with the private key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("hostname", &self.hostname)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

/// Derive the hostname for a public key.
#[must_use]
pub fn hostname_for(public_key: &VerifyingKey) -> String {
    let digest = Sha256::digest(public_key.as_bytes());
    hex::encode(&digest[..HOSTNAME_BYTES])
}

/// Parse a public key received from the wire.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidKeyLength`] for anything but 32 bytes and
/// [`IdentityError::InvalidPublicKey`] if the bytes are not a curve point.
pub fn parse_public_key(bytes: &[u8]) -> Result<VerifyingKey, IdentityError> {
    let raw: [u8; 32] = bytes
        .try_into()
        .map_err(|_| IdentityError::InvalidKeyLength { expected: 32, found: bytes.len() })?;
    VerifyingKey::from_bytes(&raw).map_err(|_| IdentityError::InvalidPublicKey)
}
