//! Transport seam between the pool and the wire protocol
//!
//! The pool never speaks a wire protocol itself. It asks a [`Transport`] to
//! open a [`Link`] to a host and hands that link to caller-supplied units of
//! work. Anything that can open and tear down a connection-like object can
//! back a pool: a raw TCP stream, a framed codec, a TLS session.

pub mod tcp;

pub use tcp::{TcpLink, TcpTransport};

use crate::config::PoolConfig;
use crate::pool::Host;
use std::future::Future;

/// Error raised while opening a link, or when using a link that is gone.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(#[from] std::io::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("link is closed")]
    Closed,
}

/// One opened, stateful link to a host.
pub trait Link: Send + 'static {
    /// Best-effort teardown. Errors are swallowed; dropping the link must
    /// also release it.
    fn close(&mut self) {}
}

/// Opens links to a host.
///
/// Implementations own the wire details (framing, serialization, socket
/// setup). A connect that fails must not leak a partially opened handle.
pub trait Transport: Send + Sync + 'static {
    type Link: Link;

    fn connect(
        &self,
        host: &Host,
        config: &PoolConfig,
    ) -> impl Future<Output = Result<Self::Link, TransportError>> + Send;
}
