//! Scenario builder API.
//!
//! Provides a declarative API for running one inbound handshake inside a
//! Turmoil simulation and checking it with an oracle.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use burrow_core::{
    AcceptDecision, Connection, Environment, InboundConnectionHandler, TimeoutPolicy,
    connection::accept_inbound,
};
use ed25519_dalek::VerifyingKey;

use crate::{
    SimEnv, SimTransport,
    scenario::{
        OracleFn, World,
        peer::{PeerBehavior, run_peer},
        world::ServerStats,
    },
};

const SERVER_HOST: &str = "server";
const CLIENT_HOST: &str = "client";
const PORT: u16 = 9878;

/// How often a finished client checks whether the server has reported.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Scenario builder.
///
/// Configure the client's behavior, the server's decision and policy, then
/// attach an oracle to get a [`RunnableScenario`].
pub struct Scenario {
    seed: u64,
    peer: PeerBehavior,
    decision: AcceptDecision,
    server_has_key: bool,
    timeout_policy: TimeoutPolicy,
    latency: Option<Duration>,
}

impl Scenario {
    /// Honest client, server accepts it as a known contact.
    pub fn new() -> Self {
        Self {
            seed: 0,
            peer: PeerBehavior::Honest,
            decision: AcceptDecision::new(true, true),
            server_has_key: true,
            timeout_policy: TimeoutPolicy::unknown_purpose(),
            latency: None,
        }
    }

    /// Seed for identities, cookies, and the simulation itself.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// What the connecting client does.
    pub fn with_peer(mut self, peer: PeerBehavior) -> Self {
        self.peer = peer;
        self
    }

    /// What the server's decision callback answers.
    pub fn with_decision(mut self, decision: AcceptDecision) -> Self {
        self.decision = decision;
        self
    }

    /// Run the server without a private key.
    pub fn without_private_key(mut self) -> Self {
        self.server_has_key = false;
        self
    }

    /// Bounded-time policy for the server's handshake.
    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    /// Fixed one-way message latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute the scenario.
    ///
    /// 1. The server host accepts one connection and runs
    ///    `process_auth_as_server` with the configured decision and policy
    /// 2. The client host runs its scripted behavior, then keeps the
    ///    connection open until the server has reported (unless it hangs up)
    /// 3. The oracle checks the collected [`World`]
    pub fn run(self) -> Result<(), String> {
        let Scenario { seed, peer, decision, server_has_key, timeout_policy, latency } =
            self.scenario;

        let server_identity = SimEnv::with_seed(seed).identity();
        let client_identity = SimEnv::with_seed(seed.wrapping_add(1)).identity();
        let server_hostname = server_identity.hostname().to_string();

        let world = Arc::new(Mutex::new(World::new(
            client_identity.hostname().to_string(),
            client_identity.public_key(),
        )));
        let server_done = Arc::new(AtomicBool::new(false));

        let mut builder = turmoil::Builder::new();
        builder
            .simulation_duration(timeout_policy.deadline() + Duration::from_secs(60))
            .rng_seed(seed);
        if let Some(latency) = latency {
            builder.min_message_latency(latency).max_message_latency(latency);
        }
        let mut sim = builder.build();

        {
            let world = Arc::clone(&world);
            let server_done = Arc::clone(&server_done);
            sim.host(SERVER_HOST, move || {
                let world = Arc::clone(&world);
                let server_done = Arc::clone(&server_done);
                let identity = server_has_key.then(|| server_identity.clone());

                async move {
                    let env = SimEnv::with_seed(seed);
                    let transport = SimTransport::bind(&format!("0.0.0.0:{}", PORT)).await?;
                    let mut connection = accept_inbound(&transport).await?;
                    let started = env.now();

                    let recorder = Arc::clone(&world);
                    let outcome = InboundConnectionHandler::new(&mut connection, env.clone())
                        .with_timeout_policy(timeout_policy)
                        .process_auth_as_server(
                            identity.as_ref(),
                            move |hostname: &str, public_key: &VerifyingKey| {
                                lock(&recorder).record_decision(hostname, public_key);
                                decision
                            },
                        )
                        .await;

                    let stats = ServerStats {
                        process_calls: connection.process_calls(),
                        frames_received: connection.frames_received(),
                        frames_sent: connection.frames_sent(),
                        elapsed: env.now() - started,
                    };
                    tracing::debug!(outcome = ?outcome.kind(), ?stats, "server reported");
                    lock(&world).record_outcome(outcome, stats);
                    server_done.store(true, Ordering::Release);

                    Ok(())
                }
            });
        }

        {
            let world = Arc::clone(&world);
            let server_done = Arc::clone(&server_done);
            sim.client(CLIENT_HOST, async move {
                let (send, recv) =
                    SimTransport::connect_to(&format!("{}:{}", SERVER_HOST, PORT)).await?;
                let mut connection = Connection::outbound(recv, send, server_hostname.as_str());

                let report = run_peer(peer, &mut connection, &client_identity, &server_hostname).await;
                if peer.hangs_up() {
                    drop(connection);
                    wait_for(&server_done).await;
                } else {
                    wait_for(&server_done).await;
                    drop(connection);
                }

                lock(&world).record_client(report);
                Ok(())
            });
        }

        sim.run().map_err(|e| format!("simulation failed: {}", e))?;
        drop(sim);

        let world = std::mem::take(&mut *lock(&world));
        (self.oracle)(&world)
    }
}

async fn wait_for(flag: &AtomicBool) {
    while !flag.load(Ordering::Acquire) {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn lock(world: &Mutex<World>) -> MutexGuard<'_, World> {
    world.lock().unwrap_or_else(PoisonError::into_inner)
}
