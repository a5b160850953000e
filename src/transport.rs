// Copyright 2026 the fastcgi-runtime contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Where connections come from.
//!
//! [`ConnectionSupplier`] is the seam between the engine's accept loop and
//! whatever hands it byte streams. [`TcpSupplier`] and [`UnixSupplier`] are
//! convenience implementations over `tokio::net`; neither performs the web
//! server's own listening-socket discovery (no `FCGI_WEB_SERVER_ADDRS`
//! checking, no inheriting file descriptor 0) -- that remains the
//! deployment's responsibility, same as the web server handing a
//! traditional FastCGI process its listening socket on fd 0.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

/// A connection handed to the engine: a duplex byte stream plus a peer
/// identity string used for diagnostics.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    fn peer_description(&self) -> String;
}

/// Supplies the engine's accept loop with incoming connections. Implemented
/// for any listener the deployment wants to drive the engine from.
pub trait ConnectionSupplier: Send {
    type Conn: Connection;

    async fn accept(&mut self) -> std::io::Result<Self::Conn>;
}

pub struct TcpConnection {
    stream: tokio::net::TcpStream,
    peer: String,
}

impl Connection for TcpConnection {
    fn peer_description(&self) -> String {
        self.peer.clone()
    }
}

impl AsyncRead for TcpConnection {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpConnection {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// Accepts plain TCP connections on a bound [`TcpListener`].
pub struct TcpSupplier {
    listener: TcpListener,
}

impl TcpSupplier {
    pub fn new(listener: TcpListener) -> Self {
        TcpSupplier { listener }
    }

    pub async fn bind(addr: impl tokio::net::ToSocketAddrs) -> std::io::Result<Self> {
        Ok(TcpSupplier::new(TcpListener::bind(addr).await?))
    }
}

impl ConnectionSupplier for TcpSupplier {
    type Conn = TcpConnection;

    async fn accept(&mut self) -> std::io::Result<TcpConnection> {
        let (stream, addr) = self.listener.accept().await?;
        Ok(TcpConnection {
            stream,
            peer: addr.to_string(),
        })
    }
}

#[cfg(unix)]
pub mod unix {
    use super::Connection;
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::net::{UnixListener, UnixStream};

    pub struct UnixConnection {
        stream: UnixStream,
        peer: String,
    }

    impl Connection for UnixConnection {
        fn peer_description(&self) -> String {
            self.peer.clone()
        }
    }

    impl AsyncRead for UnixConnection {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for UnixConnection {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.get_mut().stream).poll_flush(cx)
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
        }
    }

    /// Accepts connections on a bound Unix-domain [`UnixListener`], the
    /// conventional transport for a FastCGI process spawned by a local web
    /// server (Apache/nginx `mod_fastcgi` style deployments).
    pub struct UnixSupplier {
        listener: UnixListener,
    }

    impl UnixSupplier {
        pub fn new(listener: UnixListener) -> Self {
            UnixSupplier { listener }
        }

        pub fn bind(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
            Ok(UnixSupplier::new(UnixListener::bind(path)?))
        }
    }

    impl super::ConnectionSupplier for UnixSupplier {
        type Conn = UnixConnection;

        async fn accept(&mut self) -> std::io::Result<UnixConnection> {
            let (stream, addr) = self.listener.accept().await?;
            Ok(UnixConnection {
                stream,
                peer: format!("{addr:?}"),
            })
        }
    }
}
