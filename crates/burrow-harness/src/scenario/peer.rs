//! Scripted client peers.
//!
//! A [`PeerBehavior`] describes what the connecting client does; running it
//! produces a [`PeerReport`] of what the client observed. Peers never panic:
//! a failed step is recorded in the report and ends the script.

use burrow_core::{
    ConnectionError, Identity,
    auth::sign_proof,
    connection::Connection,
};
use burrow_proto::{
    Frame, FrameHeader, Opcode, Payload,
    payloads::auth::{self as wire, AUTH_CHANNEL_TYPE, COOKIE_LEN},
};
use tokio::io::{AsyncRead, AsyncWrite};

/// Cookie every scripted client opens with.
pub const CLIENT_COOKIE: [u8; COOKIE_LEN] = [0xC0; COOKIE_LEN];

/// Channel type a confused client asks for, and the one a pipelining client
/// requests after its proof.
pub const WRONG_CHANNEL_TYPE: &str = "im.burrow.contact.request";

/// What the connecting client does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBehavior {
    /// Opens the auth channel and signs a correct proof
    Honest,
    /// Signs its proof for a different server
    Forger,
    /// Opens the channel, then never sends a proof
    Silent,
    /// Asks for a channel type the server does not serve
    WrongChannel,
    /// Sends a proof without opening the channel first
    ProofFirst,
    /// Opens the channel, then hangs up
    Disconnect,
    /// Honest, but requests its next channel right behind the proof
    /// without waiting for the verdict
    Pipelining,
}

impl PeerBehavior {
    /// True if the client drops its connection as soon as the script ends.
    pub fn hangs_up(self) -> bool {
        matches!(self, PeerBehavior::Disconnect)
    }
}

/// What the client observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerReport {
    /// `ChannelResult.opened`, if one arrived
    pub channel_opened: Option<bool>,
    /// The server's verdict, if one arrived
    pub verdict: Option<wire::AuthResult>,
    /// Frames the client wrote
    pub frames_sent: u64,
    /// Frames the client read
    pub frames_received: u64,
    /// First failure the script hit
    pub error: Option<String>,
}

/// Run `behavior` over `connection` as `identity`, addressing `server_hostname`.
pub async fn run_peer<R, W>(
    behavior: PeerBehavior,
    connection: &mut Connection<R, W>,
    identity: &Identity,
    server_hostname: &str,
) -> PeerReport
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut report = PeerReport::default();

    if let Err(err) = script(behavior, connection, identity, server_hostname, &mut report).await {
        tracing::debug!(?behavior, %err, "scripted peer stopped");
        report.error = Some(err.to_string());
    }

    report.frames_sent = connection.frames_sent();
    report.frames_received = connection.frames_received();
    report
}

async fn script<R, W>(
    behavior: PeerBehavior,
    connection: &mut Connection<R, W>,
    identity: &Identity,
    server_hostname: &str,
    report: &mut PeerReport,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    if behavior == PeerBehavior::ProofFirst {
        let proof = sign_proof(identity, &CLIENT_COOKIE, &[0; COOKIE_LEN], server_hostname);
        connection.send_frame(&frame(Payload::Proof(proof))?).await?;
        return await_verdict(connection, report).await;
    }

    let channel_type =
        if behavior == PeerBehavior::WrongChannel { WRONG_CHANNEL_TYPE } else { AUTH_CHANNEL_TYPE };
    let open = Payload::OpenChannel(wire::OpenChannel {
        channel_type: channel_type.to_string(),
        client_cookie: CLIENT_COOKIE,
    });
    connection.send_frame(&frame(open)?).await?;

    let server_cookie = match Payload::from_frame(&connection.recv_frame().await?)? {
        Payload::ChannelResult(result) => {
            report.channel_opened = Some(result.opened);
            match result.server_cookie {
                Some(cookie) if result.opened => cookie,
                _ => return Ok(()),
            }
        },
        other => {
            return Err(ConnectionError::InvalidPayload {
                expected: "ChannelResult",
                opcode: other.opcode().to_u16(),
            });
        },
    };

    let target = match behavior {
        PeerBehavior::Honest | PeerBehavior::Pipelining => server_hostname,
        PeerBehavior::Forger => "ffffffffffffffffffff",
        _ => return Ok(()),
    };

    let proof = sign_proof(identity, &CLIENT_COOKIE, &server_cookie, target);
    connection.send_frame(&frame(Payload::Proof(proof))?).await?;

    if behavior == PeerBehavior::Pipelining {
        let next = Payload::OpenChannel(wire::OpenChannel {
            channel_type: WRONG_CHANNEL_TYPE.to_string(),
            client_cookie: CLIENT_COOKIE,
        });
        connection.send_frame(&frame(next)?).await?;
    }

    await_verdict(connection, report).await
}

async fn await_verdict<R, W>(
    connection: &mut Connection<R, W>,
    report: &mut PeerReport,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    match Payload::from_frame(&connection.recv_frame().await?)? {
        Payload::AuthResult(verdict) => {
            report.verdict = Some(verdict);
            Ok(())
        },
        other => Err(ConnectionError::InvalidPayload {
            expected: "AuthResult",
            opcode: other.opcode().to_u16(),
        }),
    }
}

fn frame(payload: Payload) -> Result<Frame, ConnectionError> {
    let header = FrameHeader::new(payload.opcode());
    Ok(payload.into_frame(header)?)
}
