//! Shared test fixtures: a scriptable in-memory transport and a fast config.

use rpcpool::{Host, Link, PoolConfig, Transport, TransportError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Transport whose connects succeed or fail on command.
#[derive(Clone, Default)]
pub struct MockTransport {
    /// When set, every connect fails
    pub refuse: Arc<AtomicBool>,
    /// Total links opened; also used as the link id sequence
    pub opened: Arc<AtomicUsize>,
    /// Total links closed
    pub closed: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockLink {
    pub id: usize,
    closed: Arc<AtomicUsize>,
}

impl Link for MockLink {
    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    type Link = MockLink;

    fn connect(
        &self,
        _host: &Host,
        _config: &PoolConfig,
    ) -> impl Future<Output = Result<MockLink, TransportError>> + Send {
        let refuse = self.refuse.clone();
        let opened = self.opened.clone();
        let closed = self.closed.clone();
        async move {
            if refuse.load(Ordering::SeqCst) {
                Err(TransportError::ConnectTimeout)
            } else {
                let id = opened.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(MockLink { id, closed })
            }
        }
    }
}

pub fn test_host() -> Host {
    Host::new("10.9.8.7", 9090)
}

/// Config tuned for fast tests: short timeouts, tiny backoff slices.
pub fn test_config() -> PoolConfig {
    PoolConfig {
        connect_timeout_ms: 200,
        socket_timeout_ms: 200,
        retry_num: 3,
        init_connection_per_host: 0,
        max_connection_per_host: 4,
        max_block_threads_per_host: 10,
        max_pending_per_host: 100,
        max_time_wait_for_connection_ms: 200,
        bad_host_timeout_count: 3,
        bad_host_timeout_window_ms: 10000,
        retry_max_delay_slice: 2,
        retry_delay_slice_ms: 10,
        retry_suspend_window_ms: 200,
    }
}
