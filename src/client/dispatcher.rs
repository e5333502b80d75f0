//! Call execution with retry across the pool
//!
//! One logical call is a unit of work: a closure the dispatcher runs against
//! a borrowed session, retrying transient failures up to the configured
//! number of attempts. Every attempt's outcome flows back through the pool's
//! return-side classification, which is where host-health transitions
//! actually get triggered.

use crate::pool::{CallError, HostPool, PoolError, Session};
use crate::transport::Transport;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::warn;

/// Runs units of work against pooled sessions, with retry.
pub struct CallDispatcher<T: Transport> {
    pool: Arc<HostPool<T>>,
}

impl<T: Transport> CallDispatcher<T> {
    pub fn new(pool: Arc<HostPool<T>>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<HostPool<T>> {
        &self.pool
    }

    /// Execute one logical call.
    ///
    /// Borrows a session, runs the work, returns the session with the
    /// outcome, and retries up to `retry_num` times. A remote application
    /// fault propagates immediately — the host answered, retrying would
    /// re-run a call the remote already rejected. Everything else is
    /// remembered and surfaced after the final attempt.
    pub async fn invoke<R, F>(&self, work: F) -> Result<R, PoolError>
    where
        F: for<'a> Fn(&'a mut T::Link) -> BoxFuture<'a, Result<R, CallError>>,
    {
        let retry_num = self.pool.config().retry_num.max(1);
        let borrow_timeout = self.pool.config().max_time_wait_for_connection();
        let mut last_error: Option<PoolError> = None;

        for attempt in 1..=retry_num {
            let mut session: Session<T::Link> = match self.pool.borrow(borrow_timeout).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(
                        host = %self.pool.host(),
                        attempt,
                        error = %e,
                        "borrow failed"
                    );
                    last_error = Some(e);
                    continue;
                }
            };

            match session.execute(&work).await {
                Ok(value) => {
                    self.pool.return_session(session, None);
                    return Ok(value);
                }
                Err(error) => {
                    let is_remote = matches!(error, CallError::Remote(_));
                    self.pool.return_session(session, Some(&error));
                    let error = PoolError::from_call(self.pool.host().clone(), error)
                        .with_attempts(attempt);
                    if is_remote {
                        return Err(error);
                    }
                    warn!(
                        host = %self.pool.host(),
                        attempt,
                        error = %error,
                        "call attempt failed"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| PoolError::pool_timeout(self.pool.host().clone()))
            .with_attempts(retry_num))
    }
}
