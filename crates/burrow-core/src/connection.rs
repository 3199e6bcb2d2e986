//! Connection processing loop.
//!
//! A [`Connection`] owns the two halves of a transport stream and runs the
//! frame loop: read bytes, cut them into [`Frame`]s, hand each frame to the
//! active [`FrameHandler`], and execute the [`ConnectionAction`]s it returns.
//!
//! # Architecture: Action-Based Handlers
//!
//! Handlers are pure state machines:
//! - `handle_frame` takes a frame and returns `Result<Vec<ConnectionAction>, _>`
//! - The connection executes the actions (send frames, close)
//!
//! # Interrupts
//!
//! [`Connection::process`] only returns on its own when the peer closes, a
//! handler closes, or something fails. Another task can make it return
//! `Ok(())` early through an [`Interrupter`]. The interrupt is cooperative:
//! it is observed between frames, never in the middle of executing a
//! handler's actions, so replies produced by a frame are always written
//! before `process` returns.
//!
//! A handler that reports [`FrameHandler::is_finished`] is parked until the
//! interrupt arrives. Frames the peer sent after its last one stay in the
//! read buffer for the next `process` call.
//!
//! ```text
//!              ┌──────────────────────────────┐
//!  bytes ─────>│ read_buf ─> Frame ─> handler │──> actions ──> writer
//!              └──────────────┬───────────────┘
//!                             │ interrupt requested?
//!                             ↓
//!                        return Ok(())
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use burrow_proto::{Frame, FrameHeader};
use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Notify,
};

use crate::{error::ConnectionError, transport::Transport};

/// Initial capacity of the read buffer; auth frames are far smaller.
const READ_BUFFER_CAPACITY: usize = 4 * 1024;

/// Actions returned by frame handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Send this frame to the peer
    SendFrame(Frame),

    /// Stop processing and close the connection with this reason
    Close {
        /// Reason for closing the connection
        reason: String,
    },
}

/// The handler currently driving a connection.
pub trait FrameHandler {
    /// Process a frame received from the peer and return actions.
    ///
    /// # Errors
    ///
    /// Any error ends the current [`Connection::process`] call with that
    /// error.
    fn handle_frame(&mut self, frame: &Frame) -> Result<Vec<ConnectionAction>, ConnectionError>;

    /// True once the handler accepts no further frames.
    ///
    /// A finished handler gets nothing more from [`Connection::process`]:
    /// later frames stay buffered for the next handler and the loop waits
    /// for an interrupt.
    fn is_finished(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct InterruptState {
    requested: AtomicBool,
    notify: Notify,
}

/// Handle that forces an in-flight [`Connection::process`] call to return.
///
/// Cheap to clone and safe to use from any task.
#[derive(Debug, Clone)]
pub struct Interrupter {
    state: Arc<InterruptState>,
}

impl Interrupter {
    /// Request that the processing loop return `Ok(())`.
    ///
    /// Non-blocking. Everything written before this call (with ordinary
    /// memory semantics) is visible to the task that observes the interrupt.
    pub fn interrupt(&self) {
        self.state.requested.store(true, Ordering::Release);
        self.state.notify.notify_one();
    }
}

/// A framed peer connection.
pub struct Connection<R, W> {
    reader: R,
    writer: W,
    read_buf: BytesMut,
    remote_hostname: Option<String>,
    interrupt: Arc<InterruptState>,
    frames_received: u64,
    frames_sent: u64,
    process_calls: u64,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn new(reader: R, writer: W, remote_hostname: Option<String>) -> Self {
        Self {
            reader,
            writer,
            read_buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            remote_hostname,
            interrupt: Arc::new(InterruptState::default()),
            frames_received: 0,
            frames_sent: 0,
            process_calls: 0,
        }
    }

    /// Wrap an accepted connection. The remote hostname is unknown until the
    /// peer authenticates.
    pub fn inbound(reader: R, writer: W) -> Self {
        Self::new(reader, writer, None)
    }

    /// Wrap a connection we initiated to `remote_hostname`.
    pub fn outbound(reader: R, writer: W, remote_hostname: impl Into<String>) -> Self {
        Self::new(reader, writer, Some(remote_hostname.into()))
    }

    /// Hostname the remote end is claimed to have, if any.
    #[must_use]
    pub fn remote_hostname(&self) -> Option<&str> {
        self.remote_hostname.as_deref()
    }

    /// Handle for interrupting [`Connection::process`] from another task.
    #[must_use]
    pub fn interrupter(&self) -> Interrupter {
        Interrupter { state: Arc::clone(&self.interrupt) }
    }

    /// Drop a pending interrupt that no `process` call consumed.
    pub fn clear_interrupt(&self) {
        self.interrupt.requested.store(false, Ordering::Release);
    }

    /// Number of frames dispatched to handlers so far.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Number of frames written so far.
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Number of times [`Connection::process`] has been entered.
    #[must_use]
    pub fn process_calls(&self) -> u64 {
        self.process_calls
    }

    /// Encode and write one frame.
    ///
    /// # Errors
    ///
    /// `Protocol` if the frame is oversized, `Transport` on write failure.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let mut wire = Vec::with_capacity(frame.encoded_len());
        frame.encode(&mut wire)?;

        self.writer.write_all(&wire).await?;
        self.writer.flush().await?;
        self.frames_sent += 1;

        Ok(())
    }

    /// Read exactly one frame, ignoring interrupts.
    ///
    /// Used by peers that drive the exchange step by step rather than
    /// through a handler.
    ///
    /// # Errors
    ///
    /// `Closed` on EOF, `Protocol` on malformed frames, `Transport` on read
    /// failure.
    pub async fn recv_frame(&mut self) -> Result<Frame, ConnectionError> {
        loop {
            if let Some(frame) = self.next_buffered_frame()? {
                self.frames_received += 1;
                return Ok(frame);
            }
            self.fill_read_buf().await?;
        }
    }

    /// Dispatch inbound frames to `handler` until interrupted, closed, or
    /// failed.
    ///
    /// Returns `Ok(())` only when an [`Interrupter`] fired. Once the handler
    /// reports [`FrameHandler::is_finished`], nothing more is read or
    /// dispatched until then. Cancel-safe at
    /// its await points: dropping the future (as a timeout policy does)
    /// loses no buffered bytes.
    ///
    /// # Errors
    ///
    /// - `Closed` if the peer closes the stream or a handler asks to close
    /// - whatever the handler returns
    /// - `Protocol` / `Transport` from framing and I/O
    pub async fn process<H>(&mut self, handler: &mut H) -> Result<(), ConnectionError>
    where
        H: FrameHandler + ?Sized,
    {
        self.process_calls += 1;
        let interrupt = Arc::clone(&self.interrupt);

        loop {
            if interrupt.requested.swap(false, Ordering::AcqRel) {
                tracing::debug!(frames = self.frames_received, "processing loop interrupted");
                return Ok(());
            }

            if handler.is_finished() {
                interrupt.notify.notified().await;
                continue;
            }

            if let Some(frame) = self.next_buffered_frame()? {
                self.frames_received += 1;
                let actions = handler.handle_frame(&frame)?;
                self.execute(actions).await?;
                continue;
            }

            tokio::select! {
                biased;
                () = interrupt.notify.notified() => {},
                read = self.reader.read_buf(&mut self.read_buf) => {
                    if read? == 0 {
                        return Err(ConnectionError::Closed("peer closed the connection".to_string()));
                    }
                },
            }
        }
    }

    async fn execute(&mut self, actions: Vec<ConnectionAction>) -> Result<(), ConnectionError> {
        for action in actions {
            match action {
                ConnectionAction::SendFrame(frame) => self.send_frame(&frame).await?,
                ConnectionAction::Close { reason } => {
                    tracing::debug!(%reason, "handler closed connection");
                    if let Err(err) = self.writer.shutdown().await {
                        tracing::debug!(%err, "shutdown after close failed");
                    }
                    return Err(ConnectionError::Closed(reason));
                },
            }
        }
        Ok(())
    }

    async fn fill_read_buf(&mut self) -> Result<(), ConnectionError> {
        if self.reader.read_buf(&mut self.read_buf).await? == 0 {
            return Err(ConnectionError::Closed("peer closed the connection".to_string()));
        }
        Ok(())
    }

    fn next_buffered_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        if self.read_buf.len() < FrameHeader::SIZE {
            return Ok(None);
        }

        let total = FrameHeader::SIZE + FrameHeader::from_bytes(&self.read_buf)?.payload_size() as usize;
        if self.read_buf.len() < total {
            self.read_buf.reserve(total - self.read_buf.len());
            return Ok(None);
        }

        let bytes = self.read_buf.split_to(total);
        Ok(Some(Frame::decode(&bytes)?))
    }
}

/// Accept the next inbound connection from `transport`.
///
/// # Errors
///
/// Returns the transport's accept error.
pub async fn accept_inbound<T: Transport>(
    transport: &T,
) -> std::io::Result<Connection<T::RecvStream, T::SendStream>> {
    let (send, recv) = transport.accept().await?;
    Ok(Connection::inbound(recv, send))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use burrow_proto::{Opcode, Payload};
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex, split};

    use super::*;

    type TestConnection = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn pair() -> (TestConnection, TestConnection) {
        let (a, b) = duplex(64 * 1024);
        let (ar, aw) = split(a);
        let (br, bw) = split(b);
        (Connection::inbound(ar, aw), Connection::outbound(br, bw, "server"))
    }

    fn close_frame() -> Frame {
        Payload::CloseChannel.into_frame(FrameHeader::new(Opcode::CloseChannel)).unwrap()
    }

    /// Records frames; optionally echoes them back or closes.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<Frame>,
        echo: bool,
        close_after: Option<usize>,
        finish_after: Option<usize>,
    }

    impl FrameHandler for Recorder {
        fn handle_frame(
            &mut self,
            frame: &Frame,
        ) -> Result<Vec<ConnectionAction>, ConnectionError> {
            self.seen.push(frame.clone());
            if self.close_after == Some(self.seen.len()) {
                return Ok(vec![ConnectionAction::Close { reason: "done".to_string() }]);
            }
            if self.echo { Ok(vec![ConnectionAction::SendFrame(frame.clone())]) } else { Ok(vec![]) }
        }

        fn is_finished(&self) -> bool {
            self.finish_after.is_some_and(|n| self.seen.len() >= n)
        }
    }

    #[tokio::test]
    async fn dispatches_frames_until_peer_closes() {
        let (mut server, mut client) = pair();

        client.send_frame(&close_frame()).await.unwrap();
        client.send_frame(&close_frame()).await.unwrap();
        drop(client);

        let mut recorder = Recorder::default();
        let result = server.process(&mut recorder).await;

        assert!(matches!(result, Err(ConnectionError::Closed(_))));
        assert_eq!(recorder.seen.len(), 2);
        assert_eq!(server.frames_received(), 2);
        assert_eq!(server.process_calls(), 1);
    }

    #[tokio::test]
    async fn interrupt_before_process_returns_immediately() {
        let (mut server, _client) = pair();

        server.interrupter().interrupt();

        let mut recorder = Recorder::default();
        assert_eq!(server.process(&mut recorder).await, Ok(()));
        assert!(recorder.seen.is_empty());
    }

    #[tokio::test]
    async fn interrupt_from_other_task_unblocks_process() {
        let (mut server, _client) = pair();
        let interrupter = server.interrupter();

        let waker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            interrupter.interrupt();
        });

        let mut recorder = Recorder::default();
        assert_eq!(server.process(&mut recorder).await, Ok(()));
        waker.await.unwrap();
    }

    #[tokio::test]
    async fn cleared_interrupt_is_not_observed() {
        let (mut server, mut client) = pair();

        server.interrupter().interrupt();
        server.clear_interrupt();

        client.send_frame(&close_frame()).await.unwrap();
        drop(client);

        let mut recorder = Recorder::default();
        assert!(matches!(server.process(&mut recorder).await, Err(ConnectionError::Closed(_))));
        assert_eq!(recorder.seen.len(), 1);
    }

    #[tokio::test]
    async fn replies_are_written_before_close() {
        let (mut server, mut client) = pair();

        client.send_frame(&close_frame()).await.unwrap();

        let mut recorder = Recorder { echo: true, close_after: Some(2), ..Recorder::default() };
        let server_task = tokio::spawn(async move {
            let result = server.process(&mut recorder).await;
            (result, recorder.seen.len())
        });

        let echoed = client.recv_frame().await.unwrap();
        assert_eq!(echoed, close_frame());

        client.send_frame(&close_frame()).await.unwrap();
        let (result, seen) = server_task.await.unwrap();
        assert_eq!(result, Err(ConnectionError::Closed("done".to_string())));
        assert_eq!(seen, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_handler_leaves_later_frames_buffered() {
        let (mut server, mut client) = pair();
        let interrupter = server.interrupter();

        // Both frames land in one read
        let first = close_frame();
        let second = Payload::Error(burrow_proto::payloads::ErrorPayload {
            code: 7,
            message: "for the next handler".to_string(),
        })
        .into_frame(FrameHeader::new(Opcode::Error))
        .unwrap();
        client.send_frame(&first).await.unwrap();
        client.send_frame(&second).await.unwrap();

        let waker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            interrupter.interrupt();
        });

        let mut recorder = Recorder { finish_after: Some(1), ..Recorder::default() };
        assert_eq!(server.process(&mut recorder).await, Ok(()));
        waker.await.unwrap();

        assert_eq!(recorder.seen, vec![first]);
        assert_eq!(server.frames_received(), 1);
        assert_eq!(server.recv_frame().await, Ok(second));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_handler_ignores_peer_hangup() {
        let (mut server, mut client) = pair();
        let interrupter = server.interrupter();

        client.send_frame(&close_frame()).await.unwrap();
        drop(client);

        let waker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            interrupter.interrupt();
        });

        let mut recorder = Recorder { finish_after: Some(1), ..Recorder::default() };
        assert_eq!(server.process(&mut recorder).await, Ok(()));
        waker.await.unwrap();
    }

    /// Accepts writes but refuses to shut down.
    struct StuckWriter;

    impl AsyncWrite for StuckWriter {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::other("shutdown refused")))
        }
    }

    #[tokio::test]
    async fn failed_shutdown_still_reports_close_reason() {
        let (a, b) = duplex(1024);
        let (ar, _aw) = split(a);
        let (_br, mut bw) = split(b);
        let mut server = Connection::inbound(ar, StuckWriter);

        let mut wire = Vec::new();
        close_frame().encode(&mut wire).unwrap();
        bw.write_all(&wire).await.unwrap();

        let mut recorder = Recorder { close_after: Some(1), ..Recorder::default() };
        assert_eq!(
            server.process(&mut recorder).await,
            Err(ConnectionError::Closed("done".to_string()))
        );
    }

    #[tokio::test]
    async fn frames_split_across_reads_are_reassembled() {
        let (a, b) = duplex(64 * 1024);
        let (ar, aw) = split(a);
        let (_br, mut raw) = split(b);
        let mut server: TestConnection = Connection::inbound(ar, aw);

        let frame = Payload::Error(burrow_proto::payloads::ErrorPayload {
            code: 1,
            message: "split me".to_string(),
        })
        .into_frame(FrameHeader::new(Opcode::Error))
        .unwrap();
        let mut wire = Vec::new();
        frame.encode(&mut wire).unwrap();

        let (first, second) = wire.split_at(5);
        raw.write_all(first).await.unwrap();
        let reader = tokio::spawn(async move { server.recv_frame().await });
        tokio::task::yield_now().await;
        raw.write_all(second).await.unwrap();

        assert_eq!(reader.await.unwrap(), Ok(frame));
    }

    #[tokio::test]
    async fn garbage_is_a_protocol_error() {
        let (a, b) = duplex(1024);
        let (ar, aw) = split(a);
        let (_br, mut raw) = split(b);
        let mut server: TestConnection = Connection::inbound(ar, aw);

        raw.write_all(&[0xFF; FrameHeader::SIZE]).await.unwrap();

        let mut recorder = Recorder::default();
        assert!(matches!(server.process(&mut recorder).await, Err(ConnectionError::Protocol(_))));
    }

    #[test]
    fn inbound_has_no_hostname_claim() {
        let (server, client) = pair();
        assert_eq!(server.remote_hostname(), None);
        assert_eq!(client.remote_hostname(), Some("server"));
    }
}
