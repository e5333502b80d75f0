//! Reference TCP transport
//!
//! Opens plain TCP links with the socket options an RPC client wants
//! (no Nagle, keepalive). Protocol layers wrap the stream themselves.

use super::{Link, Transport, TransportError};
use crate::config::PoolConfig;
use crate::pool::Host;
use std::future::Future;
use tokio::net::TcpStream;
use tracing::debug;

/// Opens raw [`TcpLink`]s. Stateless; clone freely.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

/// A pooled TCP stream.
pub struct TcpLink {
    stream: TcpStream,
}

impl TcpLink {
    /// The underlying stream, for protocol layers to read and write.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }
}

impl Link for TcpLink {
    fn close(&mut self) {
        // Dropping the stream closes the socket; nothing to flush at this layer.
    }
}

impl Transport for TcpTransport {
    type Link = TcpLink;

    fn connect(
        &self,
        host: &Host,
        config: &PoolConfig,
    ) -> impl Future<Output = Result<TcpLink, TransportError>> + Send {
        let addr = host.to_string();
        let connect_timeout = config.connect_timeout();
        async move {
            let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| TransportError::ConnectTimeout)?
                .map_err(TransportError::Connect)?;

            stream.set_nodelay(true).ok();
            let socket = socket2::SockRef::from(&stream);
            socket.set_keepalive(true).ok();

            debug!(host = %addr, "tcp link opened");
            Ok(TcpLink { stream })
        }
    }
}
