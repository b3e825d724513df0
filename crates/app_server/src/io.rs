use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{Mutex, MutexGuard},
};

/// A bidirectional byte stream a session can run on: a [`tokio::net::TcpStream`], a TLS stream,
/// or an in-memory duplex in tests.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedIo = Box<dyn Io>;

/// A connection taken over by the application. The engine no longer reads from, writes to or
/// closes it.
pub struct Hijacked {
    pub io: BoxedIo,
    /// Bytes the server had already read past the end of the request
    pub read_buf: Bytes,
}

impl std::fmt::Debug for Hijacked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hijacked")
            .field("read_buf", &self.read_buf)
            .finish_non_exhaustive()
    }
}

/// Holds the socket while the application runs, so it can write early hints or take the socket
/// for itself. Whoever takes the socket out of the slot owns it from then on.
#[derive(Clone)]
pub(crate) struct SocketSlot(Arc<Mutex<Option<BoxedIo>>>);

impl SocketSlot {
    pub fn new(io: BoxedIo) -> Self {
        Self(Arc::new(Mutex::new(Some(io))))
    }

    pub async fn lock(&self) -> MutexGuard<'_, Option<BoxedIo>> {
        self.0.lock().await
    }

    pub async fn take(&self) -> Option<BoxedIo> {
        self.0.lock().await.take()
    }
}

/// Addresses of an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub peer: SocketAddr,
    pub local: SocketAddr,
    /// The stream is encrypted, requests default to the `https` scheme
    pub tls: bool,
}

impl ConnectionInfo {
    pub fn new(peer: SocketAddr, local: SocketAddr) -> Self {
        Self {
            peer,
            local,
            tls: false,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }
}
