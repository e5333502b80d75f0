//! Chronic-timeout detection
//!
//! Tracks a sliding window of socket-timeout timestamps and decides when a
//! host has timed out often enough to be quarantined.

use crate::config::PoolConfig;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct FailureDetector {
    threshold: usize,
    window: Duration,
    timeouts: VecDeque<Instant>,
}

impl FailureDetector {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            threshold: config.bad_host_timeout_count,
            window: config.bad_host_timeout_window(),
            timeouts: VecDeque::new(),
        }
    }

    /// Record a socket timeout; returns true when the host should be
    /// quarantined.
    ///
    /// Quarantine fires when `threshold + 1` timeouts land inside the
    /// window. Entries older than the window fall out as they are popped,
    /// so the tracked sequence stays bounded by the threshold.
    pub fn record_timeout(&mut self) -> bool {
        let now = Instant::now();
        self.timeouts.push_back(now);
        if self.timeouts.len() > self.threshold {
            if let Some(oldest) = self.timeouts.pop_front() {
                return now.duration_since(oldest) < self.window;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.timeouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeouts.is_empty()
    }
}
