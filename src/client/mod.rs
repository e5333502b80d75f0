//! Client-facing call dispatch
//!
//! This module provides:
//! - Retrying call execution over a pool
//! - An explicit registry of dispatchers keyed by host

pub mod dispatcher;
pub mod registry;

pub use dispatcher::CallDispatcher;
pub use registry::PoolRegistry;
