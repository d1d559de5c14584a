//! The byte stream underneath a connection: either a plain TCP socket or
//! one wrapped in a TLS session. Everything above this layer (the
//! [`Parser`](crate::http::request::Parser), response writer) stays
//! transport-agnostic by going through [`AsyncRead`]/[`AsyncWrite`] alone.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

/// A connected socket, optionally terminating TLS.
///
/// `Plain` and `Tls` are both `Unpin`, so `Transport` derives `Unpin`
/// automatically and [`AsyncRead`]/[`AsyncWrite`] can be implemented by
/// plain delegation through `get_mut()` without any `unsafe` pinning.
pub(crate) enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    #[inline]
    pub(crate) fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Transport::Plain(stream) => stream.peer_addr(),
            Transport::Tls(stream) => stream.get_ref().0.peer_addr(),
        }
    }

    #[inline]
    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Transport::Plain(stream) => stream.local_addr(),
            Transport::Tls(stream) => stream.get_ref().0.local_addr(),
        }
    }
}

impl AsyncRead for Transport {
    #[inline]
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    #[inline]
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    #[inline]
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    #[inline]
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A connection handed off to application code after a `101 Switching
/// Protocols` reply, owning the raw socket and whatever bytes the
/// connection's read buffer already had past the end of the request that
/// triggered the upgrade.
///
/// Dropping this (or letting the handler future finish) shuts the
/// connection down — it never leaves the task it was accepted on, so no
/// cross-thread handoff is required.
pub struct UpgradedConnection {
    pub(crate) stream: Transport,
    pub(crate) leftover: Box<[u8]>,
}

impl UpgradedConnection {
    /// The transport the connection was using, ready for raw reads/writes.
    #[inline]
    pub fn stream(&mut self) -> &mut (impl AsyncRead + AsyncWrite + Unpin) {
        &mut self.stream
    }

    /// Bytes the client already sent past the end of the upgrading
    /// request (e.g. the first WebSocket frame, pipelined behind the
    /// `Upgrade` request in the same packet).
    #[inline]
    pub fn leftover(&self) -> &[u8] {
        &self.leftover
    }

    /// Shuts down the write half and drops the connection.
    #[inline]
    pub async fn close(mut self) {
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut self.stream).await;
    }
}

/// Receives ownership of a connection after it has been upgraded via
/// [`Response::upgrade`](crate::Response::upgrade).
///
/// # Examples
/// ```no_run
/// use embermhd::{UpgradeHandler, UpgradedConnection};
/// use tokio::io::{AsyncReadExt, AsyncWriteExt};
///
/// struct EchoUpgrade;
///
/// impl UpgradeHandler for EchoUpgrade {
///     async fn handle(&self, mut conn: UpgradedConnection) {
///         let mut buf = [0u8; 1024];
///         loop {
///             match conn.stream().read(&mut buf).await {
///                 Ok(0) | Err(_) => break,
///                 Ok(n) => {
///                     if conn.stream().write_all(&buf[..n]).await.is_err() {
///                         break;
///                     }
///                 }
///             }
///         }
///     }
/// }
/// ```
pub trait UpgradeHandler: Sync + Send + 'static {
    /// Takes ownership of the upgraded connection until it finishes.
    fn handle(&self, connection: UpgradedConnection) -> impl Future<Output = ()> + Send;
}

impl UpgradeHandler for () {
    async fn handle(&self, connection: UpgradedConnection) {
        connection.close().await;
    }
}

/// Object-safe stand-in for [`UpgradeHandler`], so the server can hold one
/// behind `Arc<dyn DynUpgradeHandler>` without threading another generic
/// parameter through [`HttpConnection`](crate::server::connection::HttpConnection).
pub(crate) trait DynUpgradeHandler: Sync + Send {
    fn handle_dyn<'a>(
        &'a self,
        connection: UpgradedConnection,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

impl<T: UpgradeHandler> DynUpgradeHandler for T {
    #[inline]
    fn handle_dyn<'a>(
        &'a self,
        connection: UpgradedConnection,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(UpgradeHandler::handle(self, connection))
    }
}
