//! Agent session and logical stream types

use quinn::{Connection, RecvStream, SendStream};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, error, trace};

use crate::{SessionError, SessionResult};

/// One multiplexed connection to a remote agent
///
/// Cloning is cheap; all clones refer to the same underlying connection.
/// A session stays usable for streams that are already open even after it
/// has been dropped from every registry.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Connection,
}

impl Session {
    pub fn new(connection: Connection) -> Self {
        Self { inner: connection }
    }

    /// Open a new logical stream on this session
    pub async fn open_stream(&self) -> SessionResult<SessionStream> {
        let (send, recv) = self
            .inner
            .open_bi()
            .await
            .map_err(|e| SessionError::ConnectionError(e.to_string()))?;

        trace!("Opened bidirectional stream: {}", send.id().index());

        Ok(SessionStream::new(send, recv))
    }

    /// Accept a logical stream opened by the remote peer
    ///
    /// Returns `None` when the session is closed and no more streams will
    /// arrive.
    pub async fn accept_stream(&self) -> SessionResult<Option<SessionStream>> {
        match self.inner.accept_bi().await {
            Ok((send, recv)) => {
                trace!("Accepted bidirectional stream: {}", send.id().index());
                Ok(Some(SessionStream::new(send, recv)))
            }
            Err(quinn::ConnectionError::ApplicationClosed(close)) => {
                debug!("Session closed by application: {}", close);
                Ok(None)
            }
            Err(quinn::ConnectionError::ConnectionClosed(close)) => {
                debug!("Session closed by peer: {}", close);
                Ok(None)
            }
            Err(quinn::ConnectionError::LocallyClosed) => {
                debug!("Session closed locally");
                Ok(None)
            }
            Err(quinn::ConnectionError::TimedOut) => {
                debug!("Session timed out");
                Ok(None)
            }
            Err(quinn::ConnectionError::Reset) => {
                debug!("Session reset");
                Ok(None)
            }
            Err(e) => {
                error!("Error accepting stream: {}", e);
                // Treat all other errors as session closed
                Ok(None)
            }
        }
    }

    /// Liveness probe: fails if the session is already closed, otherwise
    /// reports the connection's measured round-trip time
    pub fn probe(&self) -> SessionResult<Duration> {
        if let Some(reason) = self.inner.close_reason() {
            return Err(SessionError::ConnectionError(reason.to_string()));
        }

        Ok(self.inner.rtt())
    }

    /// Close the session
    pub fn close(&self, error_code: u32, reason: &str) {
        self.inner
            .close(quinn::VarInt::from_u32(error_code), reason.as_bytes());

        debug!(
            "Session to {} closed: {} (code: {})",
            self.inner.remote_address(),
            reason,
            error_code
        );
    }

    /// The error that closed the session, if it has closed
    pub fn close_reason(&self) -> Option<quinn::ConnectionError> {
        self.inner.close_reason()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.close_reason().is_some()
    }

    /// Resolves when the session closes, with the closure reason
    ///
    /// Safe to await from multiple tasks; resolves immediately if the
    /// session is already closed.
    pub async fn closed(&self) -> quinn::ConnectionError {
        self.inner.closed().await
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.inner.remote_address()
    }
}

/// A logical byte stream carried inside a session
///
/// Plain duplex pipe: implements [`AsyncRead`] and [`AsyncWrite`], no
/// framing of any kind.
#[derive(Debug)]
pub struct SessionStream {
    send: SendStream,
    recv: RecvStream,
    stream_id: u64,
}

impl SessionStream {
    pub fn new(send: SendStream, recv: RecvStream) -> Self {
        let stream_id = send.id().index();
        Self {
            send,
            recv,
            stream_id,
        }
    }

    /// Signal that no more data will be written on this stream
    pub fn finish(&mut self) -> SessionResult<()> {
        self.send
            .finish()
            .map_err(|e| SessionError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    /// Abruptly terminate the send side, discarding queued data
    ///
    /// The peer observes a stream error rather than a clean EOF. No-op if
    /// the stream already finished.
    pub fn reset(&mut self, error_code: u32) {
        let _ = self.send.reset(quinn::VarInt::from_u32(error_code));
    }

    /// Stream ID, unique within the owning session
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }
}

impl AsyncRead for SessionStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.recv).poll_read(cx, buf)
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        // Fully qualified: quinn's inherent `poll_write` (returning
        // `WriteError`) would otherwise shadow the tokio trait method.
        AsyncWrite::poll_write(Pin::new(&mut self.send), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.send).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.send).poll_shutdown(cx)
    }
}
