//! Bounded retries for store calls.
//!
//! A call is attempted with the configured per-attempt timeout. When the store
//! reports [`ErrorKind::Transient`] and budget remains, the policy sleeps for a
//! fixed interval, spends one unit of budget and repeats the identical call.
//! Every other error, including [`ErrorKind::Timeout`], is returned at once.
//!
//! [`ErrorKind::Transient`]: crate::ErrorKind::Transient
//! [`ErrorKind::Timeout`]: crate::ErrorKind::Timeout

use crate::store::StoreResult;
use std::time::Duration;

/// Default number of retries after a transient failure.
pub const DEFAULT_RETRIES: u32 = 10;
/// Default wait between attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
/// Default per-attempt timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Waits between attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Retry budget, backoff and timeout shared by every call of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub retries: u32,
    /// Fixed wait before each retry
    pub retry_interval: Duration,
    /// Upper bound on a single attempt
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, retry_interval: Duration, request_timeout: Duration) -> Self {
        Self {
            retries,
            retry_interval,
            request_timeout,
        }
    }

    /// Run `call` until it succeeds, fails with a non-transient error, or the
    /// budget runs out. `call` receives the per-attempt timeout.
    pub fn run<T, F>(&self, sleeper: &dyn Sleeper, operation: &str, mut call: F) -> StoreResult<T>
    where
        F: FnMut(Duration) -> StoreResult<T>,
    {
        let mut budget = self.retries;
        loop {
            match call(self.request_timeout) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && budget > 0 => {
                    tracing::warn!(
                        operation,
                        remaining = budget,
                        backoff_ms = self.retry_interval.as_millis() as u64,
                        "store unavailable, retrying: {}",
                        err.message
                    );
                    sleeper.sleep(self.retry_interval);
                    budget -= 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::warn!(operation, "retry budget exhausted: {}", err.message);
                    }
                    return Err(err);
                }
            }
        }
    }
}
