//! Bounded retry with exponential backoff (C8, §4.8).
//!
//! Wraps a fallible unit of backend work with a fixed number of attempts
//! and `10 * i^2` ms backoff between them (`i` is 1-indexed). Any error
//! triggers a retry; after the attempt budget is exhausted the last error
//! is returned. A cancelled token short-circuits without retrying.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use kvlite_core::{KvLiteError, KvLiteResult};

/// Fixed-attempt exponential backoff policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3 }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given number of attempts (must be >= 1).
    #[must_use]
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    /// Backoff delay before attempt `i` (1-indexed), in milliseconds.
    #[must_use]
    pub fn backoff_for_attempt(i: u32) -> Duration {
        Duration::from_millis(10 * u64::from(i) * u64::from(i))
    }

    /// Runs `op` up to `self.attempts` times, sleeping the backoff delay
    /// between attempts. Returns the last error if every attempt fails.
    ///
    /// Synchronous variant, for the sync form of engine operations.
    pub fn run_sync<T>(&self, mut op: impl FnMut() -> KvLiteResult<T>) -> KvLiteResult<T> {
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    last_err = Some(err);
                    if attempt < self.attempts {
                        std::thread::sleep(Self::backoff_for_attempt(attempt));
                    }
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }

    /// Async variant of [`RetryPolicy::run_sync`]. Checks `cancel` before
    /// each attempt; a cancelled token fails immediately with
    /// `KvLiteError::Cancelled` and issues no further attempts.
    pub async fn run_async<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> KvLiteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = KvLiteResult<T>>,
    {
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            if cancel.is_cancelled() {
                return Err(KvLiteError::Cancelled);
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    last_err = Some(err);
                    if attempt < self.attempts {
                        tokio::time::sleep(Self::backoff_for_attempt(attempt)).await;
                    }
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }
}
