//! Caller-owned registry of dispatchers keyed by host
//!
//! A convenience for applications that talk to many endpoints through the
//! same transport and config: one dispatcher per host, created on first
//! lookup, with explicit eviction and teardown. The registry is a plain
//! value — own it, share it behind an `Arc`, drop it; there is no process
//! global.

use super::dispatcher::CallDispatcher;
use crate::config::PoolConfig;
use crate::pool::{Host, HostPool};
use crate::transport::Transport;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct PoolRegistry<T: Transport + Clone> {
    transport: T,
    config: PoolConfig,
    pools: DashMap<Host, Arc<CallDispatcher<T>>>,
}

impl<T: Transport + Clone> PoolRegistry<T> {
    /// All pools created through this registry share the transport and a
    /// copy of this config.
    pub fn new(transport: T, config: PoolConfig) -> Self {
        Self {
            transport,
            config,
            pools: DashMap::new(),
        }
    }

    /// Fetch the dispatcher for a host, connecting a pool on first lookup.
    ///
    /// Two tasks racing on the same cold host may both warm up a pool; the
    /// loser's pool is shut down and the winner's dispatcher is returned to
    /// both, so callers always converge on one pool per host.
    pub async fn get_or_connect(&self, host: Host) -> Arc<CallDispatcher<T>> {
        if let Some(dispatcher) = self.pools.get(&host) {
            return dispatcher.value().clone();
        }

        let pool = HostPool::connect(host.clone(), self.transport.clone(), self.config.clone()).await;
        let dispatcher = Arc::new(CallDispatcher::new(pool));

        match self.pools.entry(host) {
            Entry::Occupied(entry) => {
                debug!(host = %entry.key(), "lost creation race, discarding duplicate pool");
                dispatcher.pool().shutdown();
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                info!(host = %entry.key(), "registered pool");
                entry.insert(dispatcher.clone());
                dispatcher
            }
        }
    }

    /// Look up an existing dispatcher without connecting.
    pub fn get(&self, host: &Host) -> Option<Arc<CallDispatcher<T>>> {
        self.pools.get(host).map(|d| d.value().clone())
    }

    /// Remove a host and shut its pool down. Returns false when the host
    /// was not registered.
    pub fn evict(&self, host: &Host) -> bool {
        if let Some((_, dispatcher)) = self.pools.remove(host) {
            info!(host = %host, "evicted pool");
            dispatcher.pool().shutdown();
            true
        } else {
            false
        }
    }

    /// Shut down every registered pool and clear the registry.
    pub fn shutdown_all(&self) {
        for entry in self.pools.iter() {
            entry.value().pool().shutdown();
        }
        self.pools.clear();
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

impl<T: Transport + Clone> Drop for PoolRegistry<T> {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
