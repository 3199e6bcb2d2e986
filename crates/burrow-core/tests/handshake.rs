//! End-to-end tests for the inbound handshake over an in-memory stream.
//!
//! The server runs `process_auth_as_server` on one end of a Tokio duplex; the
//! client end is scripted step by step. Time is paused, so deadlines elapse
//! instantly once every task is idle.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use burrow_core::{
    AcceptDecision, Connection, ConnectionAction, ConnectionError, Environment, FrameHandler,
    HandshakeOutcome, Identity, InboundConnectionHandler, OutcomeKind, SystemEnv, TimeoutPolicy,
    auth::sign_proof,
};
use burrow_proto::{
    Frame, FrameHeader, Opcode, Payload,
    payloads::auth::{AUTH_CHANNEL_TYPE, AuthResult, COOKIE_LEN, ChannelResult, OpenChannel},
};
use ed25519_dalek::VerifyingKey;
use tokio::{
    io::{DuplexStream, ReadHalf, WriteHalf, duplex, split},
    sync::Notify,
};

type TestConnection = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

const CLIENT_COOKIE: [u8; COOKIE_LEN] = [0xAB; COOKIE_LEN];

/// Log with `RUST_LOG=burrow_core=debug` to trace a failing test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn server_identity() -> Identity {
    Identity::from_seed([0x5E; 32])
}

fn client_identity() -> Identity {
    Identity::from_seed([0xC1; 32])
}

fn pair() -> (TestConnection, TestConnection) {
    let (a, b) = duplex(64 * 1024);
    let (ar, aw) = split(a);
    let (br, bw) = split(b);
    (Connection::inbound(ar, aw), Connection::outbound(br, bw, server_identity().hostname()))
}

fn open_frame(channel_type: &str) -> Frame {
    Payload::OpenChannel(OpenChannel {
        channel_type: channel_type.to_string(),
        client_cookie: CLIENT_COOKIE,
    })
    .into_frame(FrameHeader::new(Opcode::OpenChannel))
    .unwrap()
}

/// Run the client side of the exchange, proving `identity` to a server that
/// the client believes is `server_hostname`.
///
/// Returns the connection so it stays open until the test is done with it.
async fn run_client(
    mut conn: TestConnection,
    identity: Identity,
    server_hostname: String,
) -> (TestConnection, AuthResult) {
    conn.send_frame(&open_frame(AUTH_CHANNEL_TYPE)).await.unwrap();

    let reply = conn.recv_frame().await.unwrap();
    let server_cookie = match Payload::from_frame(&reply).unwrap() {
        Payload::ChannelResult(ChannelResult { opened: true, server_cookie: Some(cookie), .. }) => {
            cookie
        },
        other => panic!("channel not opened: {:?}", other),
    };

    let proof = sign_proof(&identity, &CLIENT_COOKIE, &server_cookie, &server_hostname);
    conn.send_frame(&Payload::Proof(proof).into_frame(FrameHeader::new(Opcode::Proof)).unwrap())
        .await
        .unwrap();

    let reply = conn.recv_frame().await.unwrap();
    match Payload::from_frame(&reply).unwrap() {
        Payload::AuthResult(result) => (conn, result),
        other => panic!("expected AuthResult, got {:?}", other),
    }
}

fn spawn_client(conn: TestConnection) -> tokio::task::JoinHandle<(TestConnection, AuthResult)> {
    tokio::spawn(run_client(conn, client_identity(), server_identity().hostname().to_string()))
}

/// Decision callback that records every invocation.
#[derive(Clone, Default)]
struct RecordingPolicy {
    calls: Arc<Mutex<Vec<(String, VerifyingKey)>>>,
}

impl RecordingPolicy {
    fn returning(
        &self,
        decision: AcceptDecision,
    ) -> impl Fn(&str, &VerifyingKey) -> AcceptDecision + Send + Sync + 'static {
        let calls = Arc::clone(&self.calls);
        move |hostname: &str, key: &VerifyingKey| {
            calls.lock().unwrap().push((hostname.to_string(), *key));
            decision
        }
    }

    fn calls(&self) -> Vec<(String, VerifyingKey)> {
        self.calls.lock().unwrap().clone()
    }
}

#[tokio::test(start_paused = true)]
async fn accepted_known_peer_succeeds() {
    init_tracing();
    let (mut server, client) = pair();
    let client_task = spawn_client(client);
    let policy = RecordingPolicy::default();

    let outcome = InboundConnectionHandler::new(&mut server, SystemEnv)
        .process_auth_as_server(
            Some(&server_identity()),
            policy.returning(AcceptDecision::new(true, true)),
        )
        .await;

    let (_client, reply) = client_task.await.unwrap();
    assert_eq!(reply, AuthResult { accepted: true, is_known_contact: true });

    let result = match outcome {
        HandshakeOutcome::Success(result) => result,
        other => panic!("expected success, got {:?}", other),
    };
    assert!(result.accepted);
    assert!(result.known);

    // The accepted peer is exactly the one the callback was shown
    let peer = result.peer.unwrap();
    assert_eq!(policy.calls(), vec![(peer.hostname.clone(), peer.public_key)]);
    assert_eq!(peer.hostname, client_identity().hostname());
    assert_eq!(peer.public_key, client_identity().public_key());
}

#[tokio::test(start_paused = true)]
async fn accepted_unknown_peer_reports_unknown() {
    let (mut server, client) = pair();
    let client_task = spawn_client(client);

    let outcome = InboundConnectionHandler::new(&mut server, SystemEnv)
        .process_auth_as_server(Some(&server_identity()), |_: &str, _: &VerifyingKey| {
            AcceptDecision::new(true, false)
        })
        .await;

    let (_client, reply) = client_task.await.unwrap();
    assert_eq!(reply, AuthResult { accepted: true, is_known_contact: false });

    let result = outcome.into_result().unwrap();
    assert!(!result.known);
}

#[tokio::test(start_paused = true)]
async fn refused_peer_is_rejected_by_policy() {
    let (mut server, client) = pair();
    let client_task = spawn_client(client);
    let policy = RecordingPolicy::default();

    let outcome = InboundConnectionHandler::new(&mut server, SystemEnv)
        .process_auth_as_server(
            Some(&server_identity()),
            policy.returning(AcceptDecision::new(false, false)),
        )
        .await;

    let (_client, reply) = client_task.await.unwrap();
    assert_eq!(reply, AuthResult { accepted: false, is_known_contact: false });

    let result = match outcome {
        HandshakeOutcome::RejectedByPolicy(result) => result,
        other => panic!("expected rejection, got {:?}", other),
    };
    assert!(!result.accepted);
    assert_eq!(result.peer.unwrap().hostname, client_identity().hostname());
    assert_eq!(policy.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn silent_peer_times_out() {
    init_tracing();
    let (mut server, mut client) = pair();

    // Open the channel, then never prove anything
    client.send_frame(&open_frame(AUTH_CHANNEL_TYPE)).await.unwrap();
    let policy = RecordingPolicy::default();

    let outcome = InboundConnectionHandler::new(&mut server, SystemEnv)
        .process_auth_as_server(
            Some(&server_identity()),
            policy.returning(AcceptDecision::new(true, true)),
        )
        .await;

    match outcome {
        HandshakeOutcome::Timeout { elapsed } => {
            assert!(elapsed >= TimeoutPolicy::unknown_purpose().deadline());
        },
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(policy.calls().is_empty());
    assert_eq!(server.process_calls(), 1);

    drop(client);
}

#[tokio::test(start_paused = true)]
async fn explicit_deadline_is_honored() {
    let (mut server, _client) = pair();

    let outcome = InboundConnectionHandler::new(&mut server, SystemEnv)
        .with_timeout_policy(TimeoutPolicy::with_deadline(Duration::from_secs(2)))
        .process_auth_as_server(Some(&server_identity()), |_: &str, _: &VerifyingKey| {
            AcceptDecision::new(true, true)
        })
        .await;

    match outcome {
        HandshakeOutcome::Timeout { elapsed } => {
            assert!(elapsed >= Duration::from_secs(2));
            assert!(elapsed < TimeoutPolicy::unknown_purpose().deadline());
        },
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn missing_private_key_touches_nothing() {
    let (mut server, mut client) = pair();
    client.send_frame(&open_frame(AUTH_CHANNEL_TYPE)).await.unwrap();
    let policy = RecordingPolicy::default();

    let outcome = InboundConnectionHandler::new(&mut server, SystemEnv)
        .process_auth_as_server(None, policy.returning(AcceptDecision::new(true, true)))
        .await;

    assert_eq!(outcome.kind(), OutcomeKind::ConfigurationError);
    assert_eq!(server.process_calls(), 0);
    assert_eq!(server.frames_received(), 0);
    assert_eq!(server.frames_sent(), 0);
    assert!(policy.calls().is_empty());
}

/// Environment whose deadline fires the moment a tripwire is pulled.
#[derive(Clone)]
struct TripwireEnv {
    tripwire: Arc<Notify>,
}

impl Environment for TripwireEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        let tripwire = Arc::clone(&self.tripwire);
        async move { tripwire.notified().await }
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0x42);
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_wins_over_accepted_result() {
    init_tracing();
    let (mut server, client) = pair();
    let client_task = spawn_client(client);

    let env = TripwireEnv { tripwire: Arc::new(Notify::new()) };
    let tripwire = Arc::clone(&env.tripwire);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    // Accept the peer, and expire the deadline in the same breath
    let outcome = InboundConnectionHandler::new(&mut server, env)
        .process_auth_as_server(Some(&server_identity()), move |_: &str, _: &VerifyingKey| {
            counter.fetch_add(1, Ordering::SeqCst);
            tripwire.notify_one();
            AcceptDecision::new(true, true)
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.kind(), OutcomeKind::Timeout);

    // The peer was told it was accepted; the caller still must not proceed
    let (_client, reply) = client_task.await.unwrap();
    assert!(reply.accepted);
}

#[tokio::test(start_paused = true)]
async fn forged_proof_skips_callback() {
    let (mut server, client) = pair();
    // Proof bound to a different server
    let client_task =
        tokio::spawn(run_client(client, client_identity(), "ffffffffffffffffffff".to_string()));
    let policy = RecordingPolicy::default();

    let outcome = InboundConnectionHandler::new(&mut server, SystemEnv)
        .process_auth_as_server(
            Some(&server_identity()),
            policy.returning(AcceptDecision::new(true, true)),
        )
        .await;

    let (_client, reply) = client_task.await.unwrap();
    assert!(!reply.accepted);
    assert_eq!(outcome.kind(), OutcomeKind::RejectedByPolicy);
    assert!(policy.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hostname_claim_mismatch_is_rejected() {
    let (a, b) = duplex(64 * 1024);
    let (ar, aw) = split(a);
    let (br, bw) = split(b);
    // This side expects to be talking to someone other than the client
    let mut server: TestConnection = Connection::outbound(ar, aw, "0123456789abcdef0123");
    let client_task = spawn_client(Connection::outbound(br, bw, server_identity().hostname()));
    let policy = RecordingPolicy::default();

    let outcome = InboundConnectionHandler::new(&mut server, SystemEnv)
        .process_auth_as_server(
            Some(&server_identity()),
            policy.returning(AcceptDecision::new(true, true)),
        )
        .await;

    let _ = client_task.await.unwrap();
    assert_eq!(outcome.kind(), OutcomeKind::RejectedByPolicy);
    assert!(policy.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unsupported_channel_type_is_rejected() {
    let (mut server, mut client) = pair();
    client.send_frame(&open_frame("im.burrow.contact.request")).await.unwrap();

    let outcome = InboundConnectionHandler::new(&mut server, SystemEnv)
        .process_auth_as_server(Some(&server_identity()), |_: &str, _: &VerifyingKey| {
            AcceptDecision::new(true, true)
        })
        .await;

    assert_eq!(outcome, HandshakeOutcome::RejectedByPolicy(burrow_core::AuthResult::rejected(None)));

    let reply = client.recv_frame().await.unwrap();
    assert!(matches!(
        Payload::from_frame(&reply).unwrap(),
        Payload::ChannelResult(ChannelResult { opened: false, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_a_connection_error() {
    let (mut server, client) = pair();
    drop(client);

    let outcome = InboundConnectionHandler::new(&mut server, SystemEnv)
        .process_auth_as_server(Some(&server_identity()), |_: &str, _: &VerifyingKey| {
            AcceptDecision::new(true, true)
        })
        .await;

    assert!(matches!(outcome, HandshakeOutcome::ConnectionError(ConnectionError::Closed(_))));
}

#[tokio::test(start_paused = true)]
async fn proof_before_open_is_a_connection_error() {
    let (mut server, mut client) = pair();
    let proof = sign_proof(&client_identity(), &CLIENT_COOKIE, &[0; COOKIE_LEN], "server");
    client
        .send_frame(&Payload::Proof(proof).into_frame(FrameHeader::new(Opcode::Proof)).unwrap())
        .await
        .unwrap();

    let outcome = InboundConnectionHandler::new(&mut server, SystemEnv)
        .process_auth_as_server(Some(&server_identity()), |_: &str, _: &VerifyingKey| {
            AcceptDecision::new(true, true)
        })
        .await;

    assert!(matches!(
        outcome,
        HandshakeOutcome::ConnectionError(ConnectionError::UnexpectedFrame { .. })
    ));
}

/// Closes on the first frame it sees.
#[derive(Default)]
struct FirstFrame {
    seen: Option<Frame>,
}

impl FrameHandler for FirstFrame {
    fn handle_frame(&mut self, frame: &Frame) -> Result<Vec<ConnectionAction>, ConnectionError> {
        self.seen = Some(frame.clone());
        Ok(vec![ConnectionAction::Close { reason: "next handler done".to_string() }])
    }
}

#[tokio::test(start_paused = true)]
async fn connection_is_free_for_next_handler() {
    let (mut server, client) = pair();
    let client_task = spawn_client(client);

    let outcome = InboundConnectionHandler::new(&mut server, SystemEnv)
        .process_auth_as_server(Some(&server_identity()), |_: &str, _: &VerifyingKey| {
            AcceptDecision::new(true, true)
        })
        .await;
    assert!(outcome.is_success());

    let (mut client, _) = client_task.await.unwrap();
    let close = Payload::CloseChannel.into_frame(FrameHeader::new(Opcode::CloseChannel)).unwrap();
    client.send_frame(&close).await.unwrap();

    // No interrupt left over from the handshake
    let mut next = FirstFrame::default();
    let result = server.process(&mut next).await;

    assert_eq!(result, Err(ConnectionError::Closed("next handler done".to_string())));
    assert_eq!(next.seen, Some(close));
    assert_eq!(server.process_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn frame_pipelined_after_proof_waits_for_next_handler() {
    init_tracing();
    let (mut server, mut client) = pair();

    let client_task = tokio::spawn(async move {
        client.send_frame(&open_frame(AUTH_CHANNEL_TYPE)).await.unwrap();
        let server_cookie = match Payload::from_frame(&client.recv_frame().await.unwrap()).unwrap() {
            Payload::ChannelResult(ChannelResult { server_cookie: Some(cookie), .. }) => cookie,
            other => panic!("channel not opened: {:?}", other),
        };

        // Proof and the next channel request go out back to back
        let proof = sign_proof(
            &client_identity(),
            &CLIENT_COOKIE,
            &server_cookie,
            server_identity().hostname(),
        );
        client
            .send_frame(&Payload::Proof(proof).into_frame(FrameHeader::new(Opcode::Proof)).unwrap())
            .await
            .unwrap();
        client.send_frame(&open_frame("im.burrow.contact.request")).await.unwrap();

        let verdict = client.recv_frame().await.unwrap();
        (client, verdict)
    });

    let outcome = InboundConnectionHandler::new(&mut server, SystemEnv)
        .process_auth_as_server(Some(&server_identity()), |_: &str, _: &VerifyingKey| {
            AcceptDecision::new(true, true)
        })
        .await;

    assert!(outcome.is_success(), "expected success, got {:?}", outcome);
    assert_eq!(server.frames_received(), 2);

    let (_client, verdict) = client_task.await.unwrap();
    assert_eq!(
        Payload::from_frame(&verdict).unwrap(),
        Payload::AuthResult(AuthResult { accepted: true, is_known_contact: true })
    );

    let mut next = FirstFrame::default();
    let result = server.process(&mut next).await;

    assert_eq!(result, Err(ConnectionError::Closed("next handler done".to_string())));
    assert_eq!(next.seen, Some(open_frame("im.burrow.contact.request")));
}
