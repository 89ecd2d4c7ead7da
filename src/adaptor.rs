//! C4 — Adaptor: uniform abstraction over a plain-TCP stream or a
//! TLS-wrapped stream.
//!
//! Grounded on the `Adaptor` template parameter of `crow::Connection` in
//! `examples/original_source/http/http_connection.h`, which is
//! instantiated over either a raw `boost::asio::ip::tcp::socket` or a
//! `boost::beast::ssl_stream<tcp::socket>`. Rust expresses the same
//! either/or with an enum instead of a template parameter.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

/// Either a plain TCP byte stream or one already wrapped in TLS.
pub enum Adaptor {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Adaptor {
    pub async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Adaptor::Plain(stream) => stream.read(buf).await,
            Adaptor::Tls(stream) => stream.read(buf).await,
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Adaptor::Plain(stream) => stream.write_all(buf).await,
            Adaptor::Tls(stream) => stream.write_all(buf).await,
        }
    }

    /// Idempotent: a second call after the stream is already shut down is a
    /// no-op success, matching the Connection destructor's unconditional
    /// close in the original.
    pub async fn close(&mut self) {
        let _ = match self {
            Adaptor::Plain(stream) => stream.shutdown().await,
            Adaptor::Tls(stream) => stream.shutdown().await,
        };
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Adaptor::Tls(_))
    }

    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        match self {
            Adaptor::Plain(stream) => stream.peer_addr().ok(),
            Adaptor::Tls(stream) => stream.get_ref().0.peer_addr().ok(),
        }
    }
}

/// Delegates to the wrapped stream's own `AsyncRead`/`AsyncWrite` impl.
/// Needed to hand an `Adaptor` to `tokio_tungstenite::accept_async`, which
/// is generic over `AsyncRead + AsyncWrite + Unpin` rather than our
/// `read_some`/`write_all` convenience methods.
impl AsyncRead for Adaptor {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Adaptor::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Adaptor::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Adaptor {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Adaptor::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Adaptor::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Adaptor::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Adaptor::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Adaptor::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Adaptor::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
