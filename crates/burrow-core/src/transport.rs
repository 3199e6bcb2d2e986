//! Transport abstraction for network I/O.
//!
//! The `Transport` trait abstracts over reliable, bidirectional byte streams.
//! In production these are onion-service streams handed over by the overlay
//! client; in simulation they are Turmoil TCP streams.
//!
//! The handshake only ever sees the resulting [`Connection`](crate::connection::Connection),
//! so nothing above this module knows which transport is in use.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Abstract transport for reliable, ordered byte streams.
///
/// # Lifecycle
///
/// ```text
/// Server:                      Client:
/// bind()                       connect()
///   ↓                            ↓
/// accept()                     (send, recv)
///   ↓
/// (send, recv)
/// ```
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Type of stream for sending data.
    type SendStream: AsyncWrite + Unpin + Send + 'static;

    /// Type of stream for receiving data.
    type RecvStream: AsyncRead + Unpin + Send + 'static;

    /// Accepts an incoming connection, returning send/receive streams.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the endpoint is shut down or the network
    /// fails.
    async fn accept(&self) -> io::Result<(Self::SendStream, Self::RecvStream)>;

    /// Connects to a remote endpoint, returning send/receive streams.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the remote is unreachable or refuses the
    /// connection.
    async fn connect(&self, remote: SocketAddr)
    -> io::Result<(Self::SendStream, Self::RecvStream)>;
}
