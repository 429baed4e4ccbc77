use multiaddr::Multiaddr;
use onionlink_common::{Result, TransportError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::Shutdown;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

/// A raw stream to or from an onion service
///
/// Outbound connections have no meaningful local address. Inbound ones
/// report the listener's onion address as local, and the socket Tor
/// forwarded from as remote.
#[derive(Debug)]
pub struct OnionConn {
    stream: TcpStream,
    local: Option<Multiaddr>,
    remote: Multiaddr,
    closed: bool,
    _tracked: Option<TrackedConn>,
}

impl OnionConn {
    pub(crate) fn outbound(stream: TcpStream, remote: Multiaddr) -> Self {
        Self {
            stream,
            local: None,
            remote,
            closed: false,
            _tracked: None,
        }
    }

    pub(crate) fn inbound(
        stream: TcpStream,
        local: Multiaddr,
        remote: Multiaddr,
        tracked: TrackedConn,
    ) -> Self {
        Self {
            stream,
            local: Some(local),
            remote,
            closed: false,
            _tracked: Some(tracked),
        }
    }

    pub fn local_multiaddr(&self) -> Option<&Multiaddr> {
        self.local.as_ref()
    }

    pub fn remote_multiaddr(&self) -> &Multiaddr {
        &self.remote
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Shut the stream down. Calling this more than once is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            // Peer or listener already tore the socket down
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

impl AsyncRead for OnionConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for OnionConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    next_id: u64,
    closed: bool,
    sockets: HashMap<u64, std::net::TcpStream>,
}

/// Registry of the inbound sockets a listener has handed out.
///
/// Holds a duplicate handle of each socket so the listener can shut every
/// one of them down on close, wherever the connection itself has gone.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConnTracker {
    inner: Arc<Mutex<TrackerState>>,
}

impl ConnTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted stream.
    ///
    /// Fails once [`ConnTracker::shutdown_all`] has run; the stream is shut
    /// down in that case.
    pub(crate) fn track(&self, stream: TcpStream) -> io::Result<(TcpStream, TrackedConn)> {
        let std_stream = stream.into_std()?;
        let handle = std_stream.try_clone()?;
        let stream = TcpStream::from_std(std_stream)?;

        let mut state = self.inner.lock();
        if state.closed {
            let _ = handle.shutdown(Shutdown::Both);
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "listener is closed",
            ));
        }

        let id = state.next_id;
        state.next_id += 1;
        state.sockets.insert(id, handle);

        Ok((
            stream,
            TrackedConn {
                id,
                tracker: self.clone(),
            },
        ))
    }

    /// Shut down every tracked socket and refuse new ones.
    ///
    /// Returns the number of sockets shut down.
    pub(crate) fn shutdown_all(&self) -> usize {
        let mut state = self.inner.lock();
        state.closed = true;

        let count = state.sockets.len();
        for (_, socket) in state.sockets.drain() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        count
    }

    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.inner.lock().sockets.len()
    }
}

/// Membership of one connection in a [`ConnTracker`]; leaves it on drop
#[derive(Debug)]
pub(crate) struct TrackedConn {
    id: u64,
    tracker: ConnTracker,
}

impl Drop for TrackedConn {
    fn drop(&mut self) {
        self.tracker.inner.lock().sockets.remove(&self.id);
    }
}
