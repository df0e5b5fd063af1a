//! Retry, backoff and session-rotation policy shared by every backend call.
//!
//! This is the only place that decides whether a call is attempted again and how long to
//! wait first. Page pullers and the orchestrator never sleep on failure themselves.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::error::FetchError;
use crate::session::{Session, SessionFactory};

/// Knobs for [`RetryController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_retries: u32,
    /// Generic backoff base; attempt `n` (1-based) waits `retry_delay * n`.
    pub retry_delay: Duration,
    /// Rate-limit backoff base; attempt index `n` (0-based) waits `rate_limit_base * 2^n`.
    pub rate_limit_base: Duration,
    /// Upper bound of the uniform jitter added to every wait.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            rate_limit_base: Duration::from_secs(1),
            max_jitter: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting at all, for tests.
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_delay: Duration::ZERO,
            rate_limit_base: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Wait before retrying after `error` failed the zero-based attempt `attempt`.
    ///
    /// Returns `None` when the retry happens without waiting (session rotation).
    #[must_use]
    pub fn backoff(&self, error: &FetchError, attempt: u32, jitter: Duration) -> Option<Duration> {
        match error {
            FetchError::RateLimited => {
                let factor = 2u32.saturating_pow(attempt);
                Some(self.rate_limit_base.saturating_mul(factor) + jitter)
            }
            FetchError::Unauthorized { soft_block: true } => None,
            _ => Some(self.retry_delay.saturating_mul(attempt.saturating_add(1)) + jitter),
        }
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Wraps single backend calls with the retry policy.
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    factory: SessionFactory,
}

impl RetryController {
    #[must_use]
    pub fn new(policy: RetryPolicy, factory: SessionFactory) -> Self {
        Self { policy, factory }
    }

    /// Run `call` until it succeeds, fails terminally, or the attempt budget is spent.
    ///
    /// `call` receives a handle to the current session on every attempt. A soft block
    /// replaces `session` with a freshly fingerprinted one before the next attempt, so the
    /// caller keeps using the rotated session afterwards.
    ///
    /// # Errors
    ///
    /// Non-retryable errors are returned as-is on first sight. Retryable errors that persist
    /// through every attempt are wrapped in [`FetchError::RetriesExhausted`].
    pub async fn execute<T, F, Fut>(
        &self,
        session: &mut Session,
        mut call: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut(Session) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.policy.max_retries.max(1);
        let mut attempt = 0u32;

        loop {
            let error = match call(session.clone()).await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt + 1 >= max_attempts {
                warn!(error = %error, attempts = attempt + 1, "Retry budget exhausted");
                return Err(FetchError::RetriesExhausted {
                    attempts: attempt + 1,
                    source: Box::new(error),
                });
            }

            match self.policy.backoff(&error, attempt, self.policy.sample_jitter()) {
                Some(delay) => {
                    warn!(
                        error = %error,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        attempt = attempt + 1,
                        generation = session.generation(),
                        "Soft block detected, rotating session"
                    );
                    *session = self.factory.refresh(session)?;
                }
            }

            attempt += 1;
        }
    }
}
