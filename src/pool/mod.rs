//! Session pooling and host health tracking
//!
//! This module provides:
//! - Bounded per-host session pooling with admission control
//! - Socket-timeout detection over a sliding window
//! - Exponential-backoff reconnection for quarantined hosts
//! - Diagnostics snapshots of pool state

pub mod backoff;
pub mod detector;
pub mod error;
pub mod host;
pub mod host_pool;
pub mod session;

pub use backoff::BackoffPolicy;
pub use detector::FailureDetector;
pub use error::{CallError, ErrorKind, PoolError, RemoteFault};
pub use host::{Host, InvalidHost};
pub use host_pool::{HostPool, PoolStatus};
pub use session::Session;
