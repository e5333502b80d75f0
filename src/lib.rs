//! rpcpool - per-host connection pooling for RPC-style clients

pub mod client;
pub mod config;
pub mod pool;
pub mod transport;

pub use client::{CallDispatcher, PoolRegistry};
pub use config::PoolConfig;
pub use pool::{
    BackoffPolicy, CallError, ErrorKind, FailureDetector, Host, HostPool, InvalidHost, PoolError,
    PoolStatus, RemoteFault, Session,
};
pub use transport::{Link, TcpLink, TcpTransport, Transport, TransportError};
