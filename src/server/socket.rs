//! Uniform socket primitives over plain TCP, TLS, or in-memory streams.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

/// Any byte stream a connection can be served over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Errors that mean the peer went away rather than that the server failed.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

pub struct Socket<S = TcpStream> {
    stream: S,
    peer: SocketAddr,
    connected: bool,
    secure: bool,
}

impl Socket<TcpStream> {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Socket::new(stream, addr))
    }
}

impl<S: Transport> Socket<S> {
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            connected: true,
            secure: false,
        }
    }

    /// Marks the socket as running over TLS.
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// False once the peer closed its side or a write hit a disconnect error.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    /// Appends whatever is available to `buf`. `Ok(0)` means the peer closed.
    pub async fn receive(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        let result = self.stream.read_buf(buf).await;
        self.observe_read(result)
    }

    /// Like [`receive`](Self::receive) but never takes more than `max` bytes,
    /// so bytes of a following request stay in the kernel buffer.
    pub async fn receive_up_to(&mut self, buf: &mut BytesMut, max: usize) -> io::Result<usize> {
        if max == 0 {
            return Ok(0);
        }
        let start = buf.len();
        buf.resize(start + max, 0);
        let result = self.stream.read(&mut buf[start..]).await;
        let n = *result.as_ref().unwrap_or(&0);
        buf.truncate(start + n);
        self.observe_read(result)
    }

    fn observe_read(&mut self, result: io::Result<usize>) -> io::Result<usize> {
        match &result {
            Ok(0) => {
                trace!(peer = %self.peer, "Peer closed its side");
                self.connected = false;
            }
            Err(e) if is_disconnect(e) => self.connected = false,
            _ => {}
        }
        result
    }

    /// One write call. Returns how many bytes the stream accepted.
    pub async fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let result = self.stream.write(data).await;
        if let Err(e) = &result {
            if is_disconnect(e) {
                self.connected = false;
            }
        }
        result
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().await
    }

    /// Closes the write side. Errors are ignored: the peer may already be gone.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            trace!(peer = %self.peer, error = %e, "Shutdown after peer left");
        }
        self.connected = false;
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

pub type AcceptFuture<S> = Pin<Box<dyn Future<Output = io::Result<S>> + Send>>;

/// Turns an accepted TCP stream into the stream requests are served over.
///
/// TLS lives behind this seam: a TLS acceptor performs the handshake and
/// returns the encrypted stream.
pub trait Acceptor: Send + Sync + 'static {
    type Stream: Transport + 'static;

    fn accept(&self, stream: TcpStream) -> AcceptFuture<Self::Stream>;

    fn is_secure(&self) -> bool {
        false
    }
}

/// Serves plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainAcceptor;

impl Acceptor for PlainAcceptor {
    type Stream = TcpStream;

    fn accept(&self, stream: TcpStream) -> AcceptFuture<TcpStream> {
        Box::pin(async move { Ok(stream) })
    }
}
