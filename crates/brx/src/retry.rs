//! 🔁 Fixed-delay retries. No jitter, no exponential anything. Try, nap, try again,
//! and give up after a known number of attempts.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// 🔁 How many tries, and how long to nap between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// 🔁 Run `operation` until it succeeds, `is_retryable` says no, or attempts run out.
    ///
    /// The last error comes back unchanged. There is no sleep after the final attempt.
    pub async fn run<T, E, Op, Fut>(
        &self,
        what: &str,
        mut operation: Op,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.attempts && is_retryable(&err) => {
                    warn!(
                        "🔁 {what} failed (attempt {attempt}/{}), retrying in {:?}: {err}",
                        self.attempts, self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
