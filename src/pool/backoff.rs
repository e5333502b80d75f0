//! Reconnect delay calculator for down episodes
//!
//! Bounded exponential backoff with jitter, plus two flat-delay branches:
//! a one-shot suspension armed when the failure detector flags chronic
//! timeouts, and a guard that protects a host which only just recovered
//! from being hammered again immediately. The two branches return the same
//! delay but differ in the state they leave behind, so both are kept.

use crate::config::PoolConfig;
use rand::Rng;
use std::time::{Duration, Instant};

pub struct BackoffPolicy {
    delay_slice: Duration,
    max_delay_slice: u64,
    suspend_window: Duration,

    /// Multiplier in delay slices, doubled per attempt up to the cap
    c: u64,
    suspended: bool,
    attempt_count: u32,
    last_success: Option<Instant>,
}

impl BackoffPolicy {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            delay_slice: config.retry_delay_slice(),
            max_delay_slice: config.retry_max_delay_slice.max(1),
            suspend_window: config.retry_suspend_window(),
            c: 1,
            suspended: false,
            attempt_count: 0,
            last_success: None,
        }
    }

    /// Delay before the next reconnect attempt.
    pub fn next_delay(&mut self) -> Duration {
        // Armed suspension wins over normal backoff and consumes no attempt.
        if self.suspended {
            self.suspended = false;
            return self.suspend_window;
        }

        self.attempt_count += 1;
        if self.attempt_count == 1 {
            if let Some(last) = self.last_success {
                if last.elapsed() < self.suspend_window {
                    return self.suspend_window;
                }
            }
        }

        self.c = (self.c * 2).min(self.max_delay_slice);
        let slices = rand::thread_rng().gen_range(1..=self.c);
        self.delay_slice * slices as u32
    }

    /// Record that reconnection succeeded.
    pub fn mark_success(&mut self) {
        self.last_success = Some(Instant::now());
    }

    /// Arm the one-shot suspension branch.
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    /// Reset for a fresh down episode.
    pub fn begin(&mut self) {
        self.attempt_count = 0;
        self.c = 1;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}
