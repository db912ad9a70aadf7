//! Retry executor: exponential backoff with optional jitter, retrying only
//! failures the taxonomy marks retryable. A server-provided retry-after
//! always wins over the computed delay; the final error is surfaced
//! unchanged.

use std::future::Future;
use std::time::Duration;

use creatorpulse_common::{config::RetrySettings, GatewayError};
use rand::Rng;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    /// Backoff for attempt `n` (0-based), before jitter:
    /// `min(max_delay, initial * multiplier^n)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let ms = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }

    /// Apply +/-10% jitter when enabled.
    fn jittered(&self, base: Duration) -> Duration {
        if !self.jitter {
            return base;
        }
        let factor = 1.0 + rand::rng().random_range(-0.1..0.1);
        Duration::from_millis((base.as_millis() as f64 * factor) as u64)
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            // MAX_ATTEMPTS counts total tries; retries are one fewer
            max_retries: s.max_attempts.saturating_sub(1),
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            multiplier: s.backoff_multiplier,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `make_fut`, retrying retryable failures up to `max_retries`
    /// times. The closure receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut make_fut: F) -> Result<T, GatewayError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0u32;
        loop {
            match make_fut(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.policy.max_retries {
                        return Err(err);
                    }
                    let delay = match err.retry_after_secs() {
                        Some(secs) => Duration::from_secs(secs),
                        None => self.policy.jittered(self.policy.delay_for_attempt(attempt)),
                    };
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        code = err.code(),
                        "Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy_no_jitter() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy_no_jitter();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = RetryPolicy {
            jitter: true,
            ..policy_no_jitter()
        };
        for _ in 0..100 {
            let d = policy.jittered(Duration::from_millis(1000)).as_millis();
            assert!((900..=1100).contains(&d), "jittered delay {d} out of band");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_503_then_succeeds() {
        let executor = RetryExecutor::new(policy_no_jitter());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);

        let result = executor
            .run(move |_| {
                let calls = Arc::clone(&calls_in);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(GatewayError::ServiceUnavailable {
                            message: "down".into(),
                            retry_after_secs: None,
                        })
                    } else {
                        Ok(200u16)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_surfaces_immediately() {
        let executor = RetryExecutor::new(policy_no_jitter());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);

        let result: Result<(), _> = executor
            .run(move |_| {
                let calls = Arc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::InvalidApiKey)
                }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), "INVALID_API_KEY");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_original_error() {
        let executor = RetryExecutor::new(RetryPolicy {
            max_retries: 2,
            ..policy_no_jitter()
        });
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);

        let result: Result<(), _> = executor
            .run(move |_| {
                let calls = Arc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::Timeout(30_000))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), "TIMEOUT");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn server_retry_after_supersedes_backoff() {
        let executor = RetryExecutor::new(policy_no_jitter());
        let started = tokio::time::Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);

        let _ = executor
            .run(move |_| {
                let calls = Arc::clone(&calls_in);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(GatewayError::RateLimitExceeded {
                            retry_after_secs: 7,
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        // Waited the server-provided 7s, not the computed 1s
        assert!(started.elapsed() >= Duration::from_secs(7));
    }
}
