//! Linear back-off retries for upstream calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy: `attempts` tries, waiting `base_delay * n` after the n-th
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn linear(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
        }
    }

    /// Script generation: 3 attempts, 1s base.
    pub const fn script() -> Self {
        Self::linear(3, Duration::from_secs(1))
    }

    /// Speech synthesis: 3 attempts, 2s base.
    pub const fn speech() -> Self {
        Self::linear(3, Duration::from_secs(2))
    }

    /// Delay after the given failed attempt (1-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `op` until it succeeds or attempts run out, returning the last
    /// error.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    warn!(operation = what, attempt, error = %e, "Attempt failed, retrying");
                    tokio::time::sleep(self.delay_after(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(RetryError {
                        attempts,
                        last: e,
                    })
                }
            }
        }
    }
}

/// The last error after every attempt failed.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed after {} attempts: {}", self.attempts, self.last)
    }
}

impl<E: std::fmt::Debug + Display> std::error::Error for RetryError<E> {}
