//! A single checked-out link to the host
//!
//! A session is exclusively owned: by the idle queue while parked, by one
//! borrower while checked out. It is never executed from two callers.

use super::error::CallError;
use super::Host;
use crate::config::PoolConfig;
use crate::transport::{Link, Transport, TransportError};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

static SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// One opened link plus its close-once bookkeeping.
pub struct Session<L: Link> {
    id: u64,
    host: Host,
    link: Option<L>,
    closed: bool,
    socket_timeout: Duration,
}

impl<L: Link> Session<L> {
    /// Open a new session through the transport.
    ///
    /// A failed open propagates the transport error and leaves no partial
    /// resources behind.
    pub async fn open<T>(
        host: &Host,
        transport: &T,
        config: &PoolConfig,
    ) -> Result<Self, TransportError>
    where
        T: Transport<Link = L>,
    {
        let start = Instant::now();
        let link = transport.connect(host, config).await?;
        let id = SESSION_ID.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            host = %host,
            session = id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "session opened"
        );
        Ok(Self {
            id,
            host: host.clone(),
            link: Some(link),
            closed: false,
            socket_timeout: config.socket_timeout(),
        })
    }

    /// Run a unit of work against the link.
    ///
    /// The work future is bounded by the socket timeout; exceeding it
    /// surfaces as [`CallError::Timeout`] so the pool can feed its failure
    /// detector on return.
    pub async fn execute<R, F>(&mut self, work: F) -> Result<R, CallError>
    where
        F: for<'a> FnOnce(&'a mut L) -> BoxFuture<'a, Result<R, CallError>>,
    {
        let link = self
            .link
            .as_mut()
            .ok_or(CallError::Transport(TransportError::Closed))?;
        let start = Instant::now();
        match tokio::time::timeout(self.socket_timeout, work(link)).await {
            Ok(result) => result,
            Err(_) => Err(CallError::Timeout {
                elapsed: start.elapsed(),
            }),
        }
    }

    /// Close the session. Idempotent; the link is released exactly once and
    /// secondary close errors are swallowed.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Some(mut link) = self.link.take() {
                link.close();
                debug!(host = %self.host, session = self.id, "session closed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn host(&self) -> &Host {
        &self.host
    }
}

impl<L: Link> std::fmt::Debug for Session<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("closed", &self.closed)
            .field("socket_timeout", &self.socket_timeout)
            .finish()
    }
}

impl<L: Link> Drop for Session<L> {
    fn drop(&mut self) {
        self.close();
    }
}
