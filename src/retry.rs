use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Non-transient failure, returned on the attempt it happened.
    Terminal(E),
    /// Every attempt failed transiently; `last` is the final error.
    Exhausted { attempts: u32, last: E },
}

/// Bounded exponential backoff: attempt `i` (0-indexed) that fails transiently
/// sleeps `base_delay * 2^i` before attempt `i + 1`. No sleep after the last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

impl RetryPolicy {
    /// `max_retries` is the total attempt budget and is clamped to at least one.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Drive `op` until it succeeds, fails terminally, or the budget runs out.
    /// `op` receives the 0-indexed attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &'static str, mut op: F) -> Result<T, RetryError<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => return Err(RetryError::Terminal(e)),
                Err(e) => {
                    if attempt + 1 >= self.max_retries {
                        return Err(RetryError::Exhausted {
                            attempts: attempt + 1,
                            last: e,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        op = label,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying: {e}"
                    );
                    metrics::counter!(crate::observability::RETRIES_TOTAL, "op" => label).increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
