//! Per-host session pool
//!
//! The pool owns the idle queue, the capacity counters, and the
//! down/recovering state machine. Borrowers and returners run concurrently;
//! correctness rests on a semaphore-gated queue and atomic counters, not on
//! one coarse lock. A single background task per down episode drives
//! reconnection with backoff.

use super::backoff::BackoffPolicy;
use super::detector::FailureDetector;
use super::error::{CallError, PoolError};
use super::session::Session;
use super::Host;
use crate::config::PoolConfig;
use crate::transport::Transport;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn lock<U>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-only snapshot of a pool's counters.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub host: Host,
    pub up: bool,
    /// Live sessions, idle or checked out
    pub open: usize,
    /// Sessions currently checked out
    pub busy: usize,
    /// Sessions parked in the idle queue
    pub idle: usize,
    /// Callers blocked waiting for a session
    pub blocked: usize,
    /// Background opens in flight
    pub pending: usize,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HostPool[host={}, up={}, open={}, busy={}, idle={}, blocked={}, pending={}]",
            self.host, self.up, self.open, self.busy, self.idle, self.blocked, self.pending
        )
    }
}

/// Bounded pool of sessions to one host.
///
/// States: ACTIVE (serving borrows) and DOWN (quarantined, failing borrows
/// fast while a background task reconnects with backoff). The DOWN→ACTIVE
/// transition is written only by the recovery task; ACTIVE→DOWN only by
/// [`mark_down`](Self::mark_down).
pub struct HostPool<T: Transport> {
    /// Self-handle for spawning background tasks from `&self` methods
    weak: Weak<Self>,

    host: Host,
    transport: T,
    config: PoolConfig,

    idle: Mutex<VecDeque<Session<T::Link>>>,
    /// Permit count tracks the idle queue length; waiters block here
    idle_items: Semaphore,

    active_count: AtomicUsize,
    pending_count: AtomicUsize,
    blocked_count: AtomicUsize,

    down: AtomicBool,
    shut: AtomicBool,

    detector: Mutex<FailureDetector>,
    backoff: Mutex<BackoffPolicy>,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

/// Releases the waiter's reservation on every exit path, including
/// cancellation of a blocked borrow.
struct BlockedGuard<'a> {
    count: &'a AtomicUsize,
    depth: usize,
}

impl<'a> BlockedGuard<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        let depth = count.fetch_add(1, Ordering::Relaxed) + 1;
        Self { count, depth }
    }
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

impl<T: Transport> HostPool<T> {
    /// Create a pool and warm it up.
    ///
    /// The config is frozen here: the pool keeps its own copy. Warm-up is
    /// best effort; a cold pool may start with zero sessions.
    pub async fn connect(host: Host, transport: T, config: PoolConfig) -> Arc<Self> {
        let pool = Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            detector: Mutex::new(FailureDetector::new(&config)),
            backoff: Mutex::new(BackoffPolicy::new(&config)),
            host,
            transport,
            config,
            idle: Mutex::new(VecDeque::new()),
            idle_items: Semaphore::new(0),
            active_count: AtomicUsize::new(0),
            pending_count: AtomicUsize::new(0),
            blocked_count: AtomicUsize::new(0),
            down: AtomicBool::new(false),
            shut: AtomicBool::new(false),
            recovery: Mutex::new(None),
        });
        pool.warm_up().await;
        pool
    }

    async fn warm_up(&self) {
        let target = self.config.init_connection_per_host;
        let mut opened = 0;
        let mut attempts = 0;
        while opened < target && attempts < 100 {
            attempts += 1;
            if self.active_count.fetch_add(1, Ordering::Relaxed) + 1
                > self.config.max_connection_per_host
            {
                self.active_count.fetch_sub(1, Ordering::Relaxed);
                break;
            }
            match Session::open(&self.host, &self.transport, &self.config).await {
                Ok(session) => {
                    self.push_idle(session);
                    opened += 1;
                }
                Err(e) => {
                    // Warm-up failures are tolerated; borrowers will open on demand
                    self.active_count.fetch_sub(1, Ordering::Relaxed);
                    debug!(host = %self.host, error = %e, "warm-up open failed");
                }
            }
        }
        if opened > 0 {
            debug!(host = %self.host, opened, "pool warmed up");
        }
    }

    /// Borrow a session, waiting up to `timeout` for one to become idle.
    ///
    /// Fails fast with a host-down error while quarantined. A zero timeout
    /// never blocks unless this call itself managed to start a background
    /// open, in which case it waits up to the connect timeout for it.
    pub async fn borrow(&self, timeout: Duration) -> Result<Session<T::Link>, PoolError> {
        if self.is_down() {
            return Err(PoolError::host_down(self.host.clone()));
        }

        let start = Instant::now();
        if let Some(session) = self.poll_idle() {
            return Ok(session);
        }

        let opening = self.try_open_async();
        if opening {
            self.wait_for_session(self.config.connect_timeout(), start)
                .await
        } else if !timeout.is_zero() {
            self.wait_for_session(timeout, start).await
        } else {
            debug!(host = %self.host, "fast fail: no idle session and no open in flight");
            Err(PoolError::pool_timeout(self.host.clone()).with_latency(start.elapsed()))
        }
    }

    async fn wait_for_session(
        &self,
        timeout: Duration,
        start: Instant,
    ) -> Result<Session<T::Link>, PoolError> {
        let blocked = BlockedGuard::enter(&self.blocked_count);
        if blocked.depth > self.config.max_block_threads_per_host {
            warn!(
                host = %self.host,
                waiters = blocked.depth,
                "too many callers blocked on this pool"
            );
            return Err(PoolError::pool_timeout(self.host.clone()).with_latency(start.elapsed()));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.idle_items.acquire()).await {
                Ok(Ok(permit)) => {
                    permit.forget();
                    // The permit can be stale if a drain raced us; keep waiting
                    if let Some(session) = lock(&self.idle).pop_front() {
                        return Ok(session);
                    }
                }
                Ok(Err(_)) | Err(_) => {
                    return Err(
                        PoolError::pool_timeout(self.host.clone()).with_latency(start.elapsed())
                    );
                }
            }
        }
    }

    /// Return a borrowed session, with the failure (if any) its last call
    /// produced.
    ///
    /// Classification drives pool health: socket timeouts feed the failure
    /// detector and quarantine the host once it flags chronic timeouts; a
    /// hard transport failure quarantines immediately; anything else leaves
    /// the session reusable. Over capacity, a healthy session is closed
    /// rather than enqueued — shedding keeps the returner from blocking at
    /// the cost of an occasional extra reconnect.
    ///
    /// Returns true when the session was closed instead of parked.
    pub fn return_session(&self, session: Session<T::Link>, error: Option<&CallError>) -> bool {
        match error {
            Some(CallError::Timeout { .. }) => {
                if lock(&self.detector).record_timeout() {
                    warn!(host = %self.host, "chronic socket timeouts, quarantining host");
                    self.close_session(session);
                    lock(&self.backoff).suspend();
                    self.mark_down("chronic socket timeouts");
                    return true;
                }
            }
            Some(CallError::Transport(e)) => {
                warn!(host = %self.host, error = %e, "transport failure, quarantining host");
                self.close_session(session);
                self.mark_down("transport failure");
                return true;
            }
            // No error, a remote fault, or a timeout below the detector
            // threshold: the session is still usable
            _ => {}
        }

        if self.active_count.load(Ordering::Relaxed) <= self.config.max_connection_per_host {
            self.push_idle(session);
            if self.is_down() {
                // A late return must not strand sessions against a dead host
                self.discard_idle();
                return true;
            }
            false
        } else {
            self.close_session(session);
            true
        }
    }

    /// Open a session directly, bypassing the idle queue.
    ///
    /// The caller owns the session and is expected to hand it back through
    /// [`return_session`](Self::return_session).
    pub async fn open_session(&self) -> Result<Session<T::Link>, PoolError> {
        if self.is_down() {
            return Err(PoolError::host_down(self.host.clone()));
        }

        if self.active_count.fetch_add(1, Ordering::Relaxed) + 1
            > self.config.max_connection_per_host
        {
            self.active_count.fetch_sub(1, Ordering::Relaxed);
            return Err(PoolError::exhausted(self.host.clone()));
        }

        match Session::open(&self.host, &self.transport, &self.config).await {
            Ok(mut session) => {
                if self.is_down() {
                    // Marked down while we were connecting: don't leak a live
                    // session into a dead pool
                    session.close();
                    self.discard_idle();
                    self.active_count.fetch_sub(1, Ordering::Relaxed);
                    return Err(PoolError::host_down(self.host.clone()));
                }
                Ok(session)
            }
            Err(e) => {
                self.active_count.fetch_sub(1, Ordering::Relaxed);
                self.mark_down("open failure");
                Err(PoolError::transport(self.host.clone(), e))
            }
        }
    }

    /// Best-effort background open to grow the idle queue.
    ///
    /// Reserves capacity synchronously so admission stays exact, then opens
    /// on a spawned task. Returns whether an open is now in flight.
    fn try_open_async(&self) -> bool {
        let Some(pool) = self.weak.upgrade() else {
            return false;
        };
        if self.active_count.fetch_add(1, Ordering::Relaxed) + 1
            > self.config.max_connection_per_host
        {
            self.active_count.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        if self.pending_count.fetch_add(1, Ordering::Relaxed) + 1 > self.config.max_pending_per_host
        {
            self.pending_count.fetch_sub(1, Ordering::Relaxed);
            self.active_count.fetch_sub(1, Ordering::Relaxed);
            return false;
        }

        tokio::spawn(async move {
            match Session::open(&pool.host, &pool.transport, &pool.config).await {
                Ok(session) => {
                    pool.push_idle(session);
                    if pool.is_down() {
                        pool.discard_idle();
                    }
                    pool.pending_count.fetch_sub(1, Ordering::Relaxed);
                }
                Err(e) => {
                    // The waiter falls back to its deadline; release the
                    // reservation so capacity isn't consumed by the failure
                    debug!(host = %pool.host, error = %e, "background open failed");
                    pool.pending_count.fetch_sub(1, Ordering::Relaxed);
                    pool.active_count.fetch_sub(1, Ordering::Relaxed);
                }
            }
        });
        true
    }

    /// Quarantine the host and schedule recovery.
    ///
    /// Idempotent: concurrent callers drain the idle queue, but only the one
    /// winning the down-flag transition starts the recovery task, so at most
    /// one reconnect attempt is ever outstanding.
    pub fn mark_down(&self, reason: &str) {
        self.discard_idle();
        if self
            .down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            warn!(host = %self.host, reason, "host marked down");
            lock(&self.backoff).begin();
            let handle = tokio::spawn(Self::recovery_loop(self.weak.clone()));
            *lock(&self.recovery) = Some(handle);
        }
    }

    /// Sole writer of the DOWN→ACTIVE transition. Holds only a weak handle
    /// so an abandoned pool is not kept alive by its own recovery task.
    async fn recovery_loop(weak: Weak<Self>) {
        loop {
            let delay = match weak.upgrade() {
                Some(pool) => {
                    let delay = lock(&pool.backoff).next_delay();
                    debug!(
                        host = %pool.host,
                        delay_ms = delay.as_millis() as u64,
                        "next reconnect attempt scheduled"
                    );
                    delay
                }
                None => return,
            };
            tokio::time::sleep(delay).await;
            let Some(pool) = weak.upgrade() else {
                return;
            };
            if pool.is_shutdown() {
                return;
            }
            if pool.reconnect().await {
                lock(&pool.backoff).mark_success();
                if pool.is_shutdown() {
                    pool.discard_idle();
                    return;
                }
                pool.down.store(false, Ordering::SeqCst);
                info!(host = %pool.host, "host recovered");
                return;
            }
        }
    }

    async fn reconnect(&self) -> bool {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        match Session::open(&self.host, &self.transport, &self.config).await {
            Ok(session) => {
                self.push_idle(session);
                true
            }
            Err(e) => {
                self.active_count.fetch_sub(1, Ordering::Relaxed);
                debug!(host = %self.host, error = %e, "reconnect failed");
                false
            }
        }
    }

    /// Permanently shut the pool down.
    ///
    /// Stops the recovery task and closes every idle session. Checked-out
    /// sessions are closed as they come back through
    /// [`return_session`](Self::return_session); no further opens succeed.
    pub fn shutdown(&self) {
        self.shut.store(true, Ordering::SeqCst);
        self.down.store(true, Ordering::SeqCst);
        if let Some(handle) = lock(&self.recovery).take() {
            handle.abort();
        }
        self.discard_idle();
        info!(host = %self.host, "pool shut down");
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst) || self.is_shutdown()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut.load(Ordering::SeqCst)
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Snapshot of the pool's counters for diagnostics.
    pub fn status(&self) -> PoolStatus {
        let idle = lock(&self.idle).len();
        let open = self.active_count.load(Ordering::Relaxed);
        let pending = self.pending_count.load(Ordering::Relaxed);
        PoolStatus {
            host: self.host.clone(),
            up: !self.is_down(),
            open,
            busy: open.saturating_sub(idle + pending),
            idle,
            blocked: self.blocked_count.load(Ordering::Relaxed),
            pending,
        }
    }

    fn poll_idle(&self) -> Option<Session<T::Link>> {
        match self.idle_items.try_acquire() {
            Ok(permit) => {
                permit.forget();
                lock(&self.idle).pop_front()
            }
            Err(_) => None,
        }
    }

    fn push_idle(&self, session: Session<T::Link>) {
        lock(&self.idle).push_back(session);
        self.idle_items.add_permits(1);
    }

    fn close_session(&self, mut session: Session<T::Link>) {
        session.close();
        self.active_count.fetch_sub(1, Ordering::Relaxed);
    }

    fn discard_idle(&self) {
        let drained: Vec<Session<T::Link>> = lock(&self.idle).drain(..).collect();
        if drained.is_empty() {
            return;
        }
        // Burn the permits belonging to the drained sessions; any we miss
        // are stale and get skipped by waiters
        for _ in &drained {
            if let Ok(permit) = self.idle_items.try_acquire() {
                permit.forget();
            }
        }
        self.active_count
            .fetch_sub(drained.len(), Ordering::Relaxed);
        debug!(host = %self.host, discarded = drained.len(), "discarded idle sessions");
        for mut session in drained {
            session.close();
        }
    }
}

impl<T: Transport> Drop for HostPool<T> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.recovery).take() {
            handle.abort();
        }
    }
}
