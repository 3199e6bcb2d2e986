//! Turmoil-based Transport implementation using TCP streams.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use burrow_core::transport::Transport;
use tokio::io::{ReadHalf, WriteHalf};
use turmoil::net::{TcpListener, TcpStream};

/// Simulation transport using Turmoil's deterministic TCP streams.
///
/// Production peers talk over onion-service streams; inside the simulation a
/// TCP stream gives the same reliable, ordered byte delivery, with Turmoil
/// controlling latency, loss, and partitions.
pub struct SimTransport {
    listener: TcpListener,
}

impl SimTransport {
    /// Binds to the specified address for accepting connections.
    ///
    /// # Errors
    ///
    /// Returns error if the address is in use or malformed.
    pub async fn bind(address: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener })
    }

    /// Connects to a simulated host, e.g. `"server:9878"`.
    ///
    /// # Errors
    ///
    /// Returns error if the host is unknown, unreachable, or refuses.
    pub async fn connect_to(
        address: &str,
    ) -> io::Result<(WriteHalf<TcpStream>, ReadHalf<TcpStream>)> {
        let stream = TcpStream::connect(address).await?;
        let (recv, send) = tokio::io::split(stream);
        Ok((send, recv))
    }
}

#[async_trait]
impl Transport for SimTransport {
    type SendStream = WriteHalf<TcpStream>;
    type RecvStream = ReadHalf<TcpStream>;

    async fn accept(&self) -> io::Result<(Self::SendStream, Self::RecvStream)> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::debug!(%peer, "accepted simulated connection");

        let (recv, send) = tokio::io::split(stream);
        Ok((send, recv))
    }

    async fn connect(&self, addr: SocketAddr) -> io::Result<(Self::SendStream, Self::RecvStream)> {
        let stream = TcpStream::connect(addr).await?;
        let (recv, send) = tokio::io::split(stream);
        Ok((send, recv))
    }
}
