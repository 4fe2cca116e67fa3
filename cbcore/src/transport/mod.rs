//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Byte-stream transport.
//!
//! One uniform [`Stream`] covers plain TCP and TLS. Connecting performs the
//! full dance for the chosen flavor — TCP connect, socket options, and for
//! TLS the client handshake — before the stream is handed out, so the layers
//! above never see a half-established connection. Write ordering is
//! guaranteed by ownership: each session holds exactly one writer half.

pub mod dns;
pub mod error;
pub mod tls;

pub use error::TransportError;

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

/// A remote endpoint by name, prior to resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Hostname or address literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

enum StreamInner {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// A connected byte stream, plain or TLS.
pub struct Stream {
    inner: StreamInner,
    peer: SocketAddr,
    open: bool,
}

impl Stream {
    /// Connects a plain TCP stream to the first reachable address of the
    /// endpoint.
    pub async fn connect_plain(endpoint: &Endpoint) -> Result<Self, TransportError> {
        let (tcp, peer) = Self::dial(endpoint).await?;
        info!(%endpoint, %peer, "tcp connection established");
        Ok(Self {
            inner: StreamInner::Plain(tcp),
            peer,
            open: true,
        })
    }

    /// Connects and completes the TLS client handshake before returning.
    pub async fn connect_tls(
        endpoint: &Endpoint,
        connector: &TlsConnector,
    ) -> Result<Self, TransportError> {
        let (tcp, peer) = Self::dial(endpoint).await?;
        let name = tls::server_name(&endpoint.host)?;
        let stream =
            connector
                .connect(name, tcp)
                .await
                .map_err(|e| TransportError::HandshakeFailed {
                    address: endpoint.to_string(),
                    source: e,
                })?;
        info!(%endpoint, %peer, "tls connection established");
        Ok(Self {
            inner: StreamInner::Tls(Box::new(stream)),
            peer,
            open: true,
        })
    }

    async fn dial(endpoint: &Endpoint) -> Result<(TcpStream, SocketAddr), TransportError> {
        let addrs = dns::resolve(&endpoint.host, endpoint.port).await?;
        let mut last_err: Option<std::io::Error> = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(tcp) => return Ok((tcp, addr)),
                Err(e) => {
                    debug!(%addr, error = %e, "endpoint attempt failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(TransportError::ConnectionFailed {
            address: endpoint.to_string(),
            source: last_err
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address")),
        })
    }

    fn tcp(&self) -> &TcpStream {
        match &self.inner {
            StreamInner::Plain(tcp) => tcp,
            StreamInner::Tls(tls) => tls.get_ref().0,
        }
    }

    /// Enables TCP_NODELAY and, when requested, keepalive on the underlying
    /// socket.
    pub fn set_options(&self, keepalive: bool) -> Result<(), TransportError> {
        let tcp = self.tcp();
        tcp.set_nodelay(true)
            .map_err(|e| TransportError::ConnectionLost {
                reason: "setting TCP_NODELAY".to_string(),
                source: Some(e),
            })?;
        if keepalive {
            socket2::SockRef::from(tcp)
                .set_keepalive(true)
                .map_err(|e| TransportError::ConnectionLost {
                    reason: "setting SO_KEEPALIVE".to_string(),
                    source: Some(e),
                })?;
        }
        Ok(())
    }

    /// Address of the connected peer.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Returns `true` until [`close`](Self::close) has completed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Returns `true` for TLS streams.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self.inner, StreamInner::Tls(_))
    }

    /// Gracefully shuts the stream down.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.shutdown()
            .await
            .map_err(|e| TransportError::ConnectionLost {
                reason: "shutdown".to_string(),
                source: Some(e),
            })
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut self.inner {
            StreamInner::Plain(s) => Pin::new(s).poll_read(cx, buf),
            StreamInner::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut self.inner {
            StreamInner::Plain(s) => Pin::new(s).poll_write(cx, buf),
            StreamInner::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.inner {
            StreamInner::Plain(s) => Pin::new(s).poll_flush(cx),
            StreamInner::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.inner {
            StreamInner::Plain(s) => Pin::new(s).poll_shutdown(cx),
            StreamInner::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_plain_connect_and_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = peer.read(&mut buf).await.unwrap();
            peer.write_all(&buf[..n]).await.unwrap();
        });

        let endpoint = Endpoint::new("127.0.0.1", addr.port());
        let mut stream = Stream::connect_plain(&endpoint).await.unwrap();
        stream.set_options(true).unwrap();
        assert!(stream.is_open());
        assert!(!stream.is_tls());

        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        stream.close().await.unwrap();
        assert!(!stream.is_open());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let endpoint = Endpoint::new("127.0.0.1", 1);
        let result = Stream::connect_plain(&endpoint).await;
        assert!(matches!(
            result,
            Err(TransportError::ConnectionFailed { .. })
        ));
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("db.local", 11210).to_string(), "db.local:11210");
    }
}
