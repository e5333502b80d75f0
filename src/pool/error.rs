//! Error types surfaced by the pool and the dispatcher
//!
//! [`PoolError`] is the single carrier handed to callers: a kind plus the
//! host, observed latency, and attempt count for diagnostics. [`CallError`]
//! is the classification the protocol collaborator reports for a failure
//! raised while executing a unit of work; the pool turns it into health
//! decisions on return.

use super::Host;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// A well-formed error from the remote side.
///
/// Remote faults mean the host is alive and answering; they never trigger
/// quarantine and are never retried by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct RemoteFault {
    pub code: i32,
    pub message: String,
}

impl RemoteFault {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Failure raised while executing a unit of work on a borrowed session.
#[derive(Debug, Error)]
pub enum CallError {
    /// The link itself failed (reset, broken pipe, handshake error).
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The call exceeded the socket timeout.
    #[error("socket timeout after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// The remote answered with a well-formed application error.
    #[error("remote application error: {0}")]
    Remote(RemoteFault),
}

/// What went wrong, without the diagnostic trimmings.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("host is down")]
    HostDown,

    #[error("timed out waiting for a session")]
    PoolTimeout,

    #[error("pool exhausted")]
    Exhausted,

    #[error("transport failure: {0}")]
    Transport(TransportError),

    #[error("socket timeout during call")]
    SocketTimeout,

    #[error("remote application error: {0}")]
    Remote(RemoteFault),
}

/// Error surfaced by [`HostPool`](super::HostPool) and
/// [`CallDispatcher`](crate::client::CallDispatcher).
///
/// Carries the host, the latency observed before failing, and how many
/// attempts the dispatcher made. These are data for diagnostics; control
/// flow should branch on [`kind`](Self::kind) alone.
#[derive(Debug, Error)]
#[error("{kind} [host={host}, latency={}ms, attempts={attempts}]", .latency.as_millis())]
pub struct PoolError {
    kind: ErrorKind,
    host: Host,
    latency: Duration,
    attempts: u32,
}

impl PoolError {
    pub fn new(kind: ErrorKind, host: Host) -> Self {
        Self {
            kind,
            host,
            latency: Duration::ZERO,
            attempts: 0,
        }
    }

    pub fn host_down(host: Host) -> Self {
        Self::new(ErrorKind::HostDown, host)
    }

    pub fn pool_timeout(host: Host) -> Self {
        Self::new(ErrorKind::PoolTimeout, host)
    }

    pub fn exhausted(host: Host) -> Self {
        Self::new(ErrorKind::Exhausted, host)
    }

    pub fn transport(host: Host, source: TransportError) -> Self {
        Self::new(ErrorKind::Transport(source), host)
    }

    pub fn remote(host: Host, fault: RemoteFault) -> Self {
        Self::new(ErrorKind::Remote(fault), host)
    }

    /// Lift an execute-time classification into a surfaced error.
    pub fn from_call(host: Host, error: CallError) -> Self {
        match error {
            CallError::Transport(e) => Self::transport(host, e),
            CallError::Timeout { elapsed } => {
                Self::new(ErrorKind::SocketTimeout, host).with_latency(elapsed)
            }
            CallError::Remote(fault) => Self::remote(host, fault),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_host_down(&self) -> bool {
        matches!(self.kind, ErrorKind::HostDown)
    }

    pub fn is_pool_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::PoolTimeout)
    }
}
