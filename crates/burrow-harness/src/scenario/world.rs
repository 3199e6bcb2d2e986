//! World state for scenario execution.
//!
//! The World collects what both ends observed during one simulated
//! handshake: the server's outcome and counters, every decision-callback
//! invocation, and the client's [`PeerReport`]. Oracles inspect it after the
//! simulation has finished.

use std::time::Duration;

use burrow_core::{HandshakeOutcome, OutcomeKind};
use ed25519_dalek::VerifyingKey;

use crate::scenario::peer::PeerReport;

/// One invocation of the decision callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionCall {
    /// Hostname the callback was shown
    pub hostname: String,
    /// Public key the callback was shown
    pub public_key: VerifyingKey,
}

/// Server-side counters taken after the handshake returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// `Connection::process` invocations
    pub process_calls: u64,
    /// Frames the server dispatched
    pub frames_received: u64,
    /// Frames the server wrote
    pub frames_sent: u64,
    /// Virtual time from accept to outcome
    pub elapsed: Duration,
}

/// Observations from a single client-server handshake.
#[derive(Debug, Default)]
pub struct World {
    client_hostname: String,
    client_public_key: Option<VerifyingKey>,
    outcome: Option<HandshakeOutcome>,
    decisions: Vec<DecisionCall>,
    server: ServerStats,
    client: PeerReport,
}

impl World {
    /// Create an empty world for a client with the given identity.
    pub(crate) fn new(client_hostname: String, client_public_key: VerifyingKey) -> Self {
        Self { client_hostname, client_public_key: Some(client_public_key), ..Self::default() }
    }

    pub(crate) fn record_decision(&mut self, hostname: &str, public_key: &VerifyingKey) {
        self.decisions.push(DecisionCall { hostname: hostname.to_string(), public_key: *public_key });
    }

    pub(crate) fn record_outcome(&mut self, outcome: HandshakeOutcome, stats: ServerStats) {
        assert!(self.outcome.is_none(), "server reported twice");
        self.outcome = Some(outcome);
        self.server = stats;
    }

    pub(crate) fn record_client(&mut self, report: PeerReport) {
        self.client = report;
    }

    /// The server's outcome.
    ///
    /// Panics if the server never reported.
    pub fn outcome(&self) -> &HandshakeOutcome {
        self.outcome.as_ref().expect("server did not report an outcome")
    }

    /// Class of the server's outcome, if it reported one.
    pub fn outcome_kind(&self) -> Option<OutcomeKind> {
        self.outcome.as_ref().map(HandshakeOutcome::kind)
    }

    /// Every decision-callback invocation, in order.
    pub fn decisions(&self) -> &[DecisionCall] {
        &self.decisions
    }

    /// Server counters.
    pub fn server(&self) -> ServerStats {
        self.server
    }

    /// What the client observed.
    pub fn client(&self) -> &PeerReport {
        &self.client
    }

    /// Hostname of the scripted client.
    pub fn client_hostname(&self) -> &str {
        &self.client_hostname
    }

    /// True if a `Success` outcome names the real client, and the callback
    /// was shown exactly that client.
    pub fn success_matches_client(&self) -> bool {
        let Some(HandshakeOutcome::Success(result)) = &self.outcome else {
            return false;
        };
        let Some(peer) = &result.peer else {
            return false;
        };

        result.accepted
            && peer.hostname == self.client_hostname
            && Some(peer.public_key) == self.client_public_key
            && self.decisions
                == [DecisionCall { hostname: peer.hostname.clone(), public_key: peer.public_key }]
    }
}
