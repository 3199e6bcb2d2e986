//! Server side of the authentication channel.
//!
//! [`ServerAuthHandler`] is a [`FrameHandler`]: it consumes the client's
//! `OpenChannel` and `Proof` frames, answers them, and produces exactly one
//! terminal [`AuthResult`], delivered through an [`AuthResultWaiter`].
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ OpenChannel ┌───────────────┐  Proof   ┌──────────┐
//! │ AwaitingOpen │────────────>│ AwaitingProof │─────────>│ Accepted │
//! └──────────────┘             └───────────────┘          └──────────┘
//!        │                             │
//!        │ bad channel type / Close    │ bad proof / refused / Close
//!        ↓                             ↓
//!   ┌──────────┐                  ┌──────────┐
//!   │ Rejected │                  │ Rejected │
//!   └──────────┘                  └──────────┘
//! ```
//!
//! The decision callback runs at most once, and only after a proof whose
//! signature verifies against the transcript. Any frame after the terminal
//! state is a protocol violation.

use burrow_proto::{
    Frame, FrameHeader, Opcode, Payload,
    payloads::auth::{self as wire, AUTH_CHANNEL_TYPE, COOKIE_LEN},
};
use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;

use crate::{
    connection::{ConnectionAction, FrameHandler},
    env::Environment,
    error::ConnectionError,
    identity::{self, Identity},
};

/// Domain separator mixed into every proof transcript.
const PROOF_DOMAIN: &[u8] = b"burrow-auth-proof-v1";

/// Outcome of the caller's decision callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcceptDecision {
    /// Authentication is accepted
    pub allowed: bool,
    /// Peer is a recognized contact. Unknown peers are expected to send a
    /// contact request before anything else.
    pub known: bool,
}

impl AcceptDecision {
    /// Build a decision.
    #[must_use]
    pub const fn new(allowed: bool, known: bool) -> Self {
        Self { allowed, known }
    }
}

/// Server authorization hook.
///
/// Invoked with the authenticated peer's hostname and public key. May run on
/// a different task than the one that started the handshake, hence the
/// `Send + Sync + 'static` bound.
pub trait AcceptPolicy: Send + Sync + 'static {
    /// Decide whether to accept the peer.
    fn decide(&self, hostname: &str, public_key: &VerifyingKey) -> AcceptDecision;
}

impl<F> AcceptPolicy for F
where
    F: Fn(&str, &VerifyingKey) -> AcceptDecision + Send + Sync + 'static,
{
    fn decide(&self, hostname: &str, public_key: &VerifyingKey) -> AcceptDecision {
        self(hostname, public_key)
    }
}

/// Authenticated claim of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Hostname derived from `public_key`
    pub hostname: String,
    /// The peer's public key
    pub public_key: VerifyingKey,
}

/// Terminal result of one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthResult {
    /// Authentication accepted
    pub accepted: bool,
    /// Peer is a known contact
    pub known: bool,
    /// Peer identity, when a proof was received
    pub peer: Option<PeerIdentity>,
}

impl AuthResult {
    /// A non-accepted result.
    #[must_use]
    pub fn rejected(peer: Option<PeerIdentity>) -> Self {
        Self { accepted: false, known: false, peer }
    }
}

/// The values a proof signature commits to.
#[derive(Debug, Clone, Copy)]
pub struct ProofTranscript<'a> {
    /// Cookie chosen by the client
    pub client_cookie: &'a [u8; COOKIE_LEN],
    /// Cookie chosen by the server
    pub server_cookie: &'a [u8; COOKIE_LEN],
    /// Hostname derived from the client's public key
    pub client_hostname: &'a str,
    /// Hostname of the server being authenticated to
    pub server_hostname: &'a str,
}

impl ProofTranscript<'_> {
    /// SHA-256 digest that gets signed.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(PROOF_DOMAIN);
        hasher.update(self.client_cookie);
        hasher.update(self.server_cookie);
        // 8-byte big-endian length prefix keeps the encoding injective for
        // hostnames of any length
        for hostname in [self.client_hostname, self.server_hostname] {
            hasher.update((hostname.len() as u64).to_be_bytes());
            hasher.update(hostname.as_bytes());
        }
        hasher.finalize().into()
    }
}

/// Checks a proof signature.
pub trait ProofVerifier: Send + Sync {
    /// Returns true if `signature` by `public_key` covers `transcript`.
    fn verify(
        &self,
        public_key: &VerifyingKey,
        signature: &Signature,
        transcript: &ProofTranscript<'_>,
    ) -> bool;
}

/// Ed25519 strict verification over [`ProofTranscript::digest`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519ProofVerifier;

impl ProofVerifier for Ed25519ProofVerifier {
    fn verify(
        &self,
        public_key: &VerifyingKey,
        signature: &Signature,
        transcript: &ProofTranscript<'_>,
    ) -> bool {
        public_key.verify_strict(&transcript.digest(), signature).is_ok()
    }
}

/// Client side: build the proof for the given cookies.
#[must_use]
pub fn sign_proof(
    identity: &Identity,
    client_cookie: &[u8; COOKIE_LEN],
    server_cookie: &[u8; COOKIE_LEN],
    server_hostname: &str,
) -> wire::Proof {
    let transcript = ProofTranscript {
        client_cookie,
        server_cookie,
        client_hostname: identity.hostname(),
        server_hostname,
    };
    let signature = identity.sign(&transcript.digest());

    wire::Proof {
        public_key: identity.public_key().as_bytes().to_vec(),
        signature: signature.to_bytes().to_vec(),
    }
}

/// Auth channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Waiting for the client to open the channel
    AwaitingOpen,
    /// Server cookie sent, waiting for the proof
    AwaitingProof,
    /// Terminal: authentication accepted
    Accepted,
    /// Terminal: authentication refused or abandoned
    Rejected,
}

impl AuthState {
    /// True for `Accepted` and `Rejected`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, AuthState::Accepted | AuthState::Rejected)
    }
}

/// Receives the terminal [`AuthResult`] of a [`ServerAuthHandler`].
#[derive(Debug)]
pub struct AuthResultWaiter {
    rx: oneshot::Receiver<AuthResult>,
}

impl AuthResultWaiter {
    /// Wait for the terminal result.
    ///
    /// Returns `None` if the handler was dropped before reaching a terminal
    /// state.
    pub async fn wait(self) -> Option<AuthResult> {
        self.rx.await.ok()
    }
}

/// Server side of the authentication channel.
pub struct ServerAuthHandler<E: Environment> {
    env: E,
    identity: Identity,
    remote_hostname: Option<String>,
    verifier: Box<dyn ProofVerifier>,
    policy: Option<Box<dyn AcceptPolicy>>,
    state: AuthState,
    channel_id: u32,
    client_cookie: [u8; COOKIE_LEN],
    server_cookie: [u8; COOKIE_LEN],
    result_tx: Option<oneshot::Sender<AuthResult>>,
}

impl<E: Environment> ServerAuthHandler<E> {
    /// Create a handler bound to `identity`.
    ///
    /// `remote_hostname` is the hostname the connection claims to reach; for
    /// inbound connections it is `None`. When present, a proof for any other
    /// hostname is rejected.
    pub fn new(
        env: E,
        identity: Identity,
        remote_hostname: Option<String>,
    ) -> (Self, AuthResultWaiter) {
        let (result_tx, rx) = oneshot::channel();
        let handler = Self {
            env,
            identity,
            remote_hostname,
            verifier: Box::new(Ed25519ProofVerifier),
            policy: None,
            state: AuthState::AwaitingOpen,
            channel_id: 0,
            client_cookie: [0; COOKIE_LEN],
            server_cookie: [0; COOKIE_LEN],
            result_tx: Some(result_tx),
        };
        (handler, AuthResultWaiter { rx })
    }

    /// Replace the proof verifier.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Box<dyn ProofVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Install the server authorization hook.
    ///
    /// Without a hook every proof is refused.
    pub fn set_server_authorization_hook<P: AcceptPolicy>(&mut self, policy: P) {
        self.policy = Some(Box::new(policy));
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state
    }

    fn reply(&self, payload: Payload) -> Result<ConnectionAction, ConnectionError> {
        let mut header = FrameHeader::new(payload.opcode());
        header.set_channel_id(self.channel_id);
        Ok(ConnectionAction::SendFrame(payload.into_frame(header)?))
    }

    fn finish(&mut self, result: AuthResult) {
        self.state = if result.accepted { AuthState::Accepted } else { AuthState::Rejected };

        tracing::debug!(
            state = ?self.state,
            known = result.known,
            peer = result.peer.as_ref().map(|p| p.hostname.as_str()),
            "auth channel finished"
        );

        match self.result_tx.take() {
            // Receiver gone means the handshake was abandoned; nothing to report to.
            Some(tx) => {
                let _ = tx.send(result);
            },
            None => tracing::error!("auth result produced twice"),
        }
    }

    fn handle_open(&mut self, frame: &Frame) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let Payload::OpenChannel(open) = Payload::from_frame(frame)? else {
            return Err(ConnectionError::InvalidPayload {
                expected: "OpenChannel",
                opcode: Opcode::OpenChannel.to_u16(),
            });
        };

        self.channel_id = frame.header.channel_id();

        if open.channel_type != AUTH_CHANNEL_TYPE {
            tracing::warn!(channel_type = %open.channel_type, "refusing unsupported channel type");
            let action = self.reply(Payload::ChannelResult(wire::ChannelResult {
                opened: false,
                server_cookie: None,
                common_error: Some("unsupported channel type".to_string()),
            }))?;
            self.finish(AuthResult::rejected(None));
            return Ok(vec![action]);
        }

        self.client_cookie = open.client_cookie;
        self.server_cookie = self.env.random_cookie();
        self.state = AuthState::AwaitingProof;

        Ok(vec![self.reply(Payload::ChannelResult(wire::ChannelResult {
            opened: true,
            server_cookie: Some(self.server_cookie),
            common_error: None,
        }))?])
    }

    fn handle_proof(&mut self, frame: &Frame) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let Payload::Proof(proof) = Payload::from_frame(frame)? else {
            return Err(ConnectionError::InvalidPayload {
                expected: "Proof",
                opcode: Opcode::Proof.to_u16(),
            });
        };

        let public_key = identity::parse_public_key(&proof.public_key).map_err(|_| {
            ConnectionError::InvalidPayload {
                expected: "32-byte Ed25519 public key",
                opcode: Opcode::Proof.to_u16(),
            }
        })?;
        let signature_bytes: [u8; 64] = proof.signature.as_slice().try_into().map_err(|_| {
            ConnectionError::InvalidPayload {
                expected: "64-byte signature",
                opcode: Opcode::Proof.to_u16(),
            }
        })?;
        let signature = Signature::from_bytes(&signature_bytes);

        let peer = PeerIdentity { hostname: identity::hostname_for(&public_key), public_key };

        let result = if self
            .remote_hostname
            .as_deref()
            .is_some_and(|claimed| claimed != peer.hostname)
        {
            tracing::warn!(peer = %peer.hostname, "proof hostname does not match claim");
            AuthResult::rejected(Some(peer))
        } else if !self.verifier.verify(&peer.public_key, &signature, &ProofTranscript {
            client_cookie: &self.client_cookie,
            server_cookie: &self.server_cookie,
            client_hostname: &peer.hostname,
            server_hostname: self.identity.hostname(),
        }) {
            tracing::warn!(peer = %peer.hostname, "proof signature invalid");
            AuthResult::rejected(Some(peer))
        } else {
            let decision = match &self.policy {
                Some(policy) => policy.decide(&peer.hostname, &peer.public_key),
                None => {
                    tracing::warn!("no authorization hook installed, refusing peer");
                    AcceptDecision::default()
                },
            };
            AuthResult { accepted: decision.allowed, known: decision.known, peer: Some(peer) }
        };

        let action = self.reply(Payload::AuthResult(wire::AuthResult {
            accepted: result.accepted,
            is_known_contact: result.known,
        }))?;
        self.finish(result);

        Ok(vec![action])
    }
}

impl<E: Environment> FrameHandler for ServerAuthHandler<E> {
    fn handle_frame(&mut self, frame: &Frame) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let Some(opcode) = frame.header.opcode_enum() else {
            return Err(ConnectionError::UnexpectedFrame {
                state: self.state,
                opcode: frame.header.opcode(),
            });
        };

        match (self.state, opcode) {
            (AuthState::AwaitingOpen, Opcode::OpenChannel) => self.handle_open(frame),

            (AuthState::AwaitingProof, Opcode::Proof) => self.handle_proof(frame),

            // Client gave up before finishing
            (AuthState::AwaitingOpen | AuthState::AwaitingProof, Opcode::CloseChannel) => {
                self.finish(AuthResult::rejected(None));
                Ok(vec![])
            },

            (_, Opcode::Error) => {
                let reason = match Payload::from_frame(frame) {
                    Ok(Payload::Error(error)) => format!("peer error {}: {}", error.code, error.message),
                    _ => "peer error".to_string(),
                };
                Ok(vec![ConnectionAction::Close { reason }])
            },

            (state, opcode) => {
                Err(ConnectionError::UnexpectedFrame { state, opcode: opcode.to_u16() })
            },
        }
    }

    fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}
