//! Circuit breaker guarding a named downstream. Closed passes calls through
//! and counts failures; open fails fast until the reset timeout elapses;
//! half-open lets probes through and closes again after three consecutive
//! successes.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use creatorpulse_common::GatewayError;
use tracing::{info, warn};

/// Consecutive half-open successes required to close.
const CLOSE_AFTER_SUCCESSES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Failures in closed state before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before probing.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    successes: u32,
    last_failure: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Gate a call. Transitions open → half-open once the reset timeout has
    /// elapsed; otherwise fails fast while open.
    pub fn check_allowed(&self, now: DateTime<Utc>) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| now - t)
                    .unwrap_or_else(chrono::Duration::zero);
                if elapsed
                    >= chrono::Duration::from_std(self.config.reset_timeout)
                        .unwrap_or_else(|_| chrono::Duration::zero())
                {
                    info!(breaker = %self.name, "Reset timeout elapsed, probing");
                    inner.state = BreakerState::HalfOpen;
                    inner.successes = 0;
                    Ok(())
                } else {
                    Err(GatewayError::CircuitBreakerOpen(self.name.clone()))
                }
            }
        }
    }

    pub fn record_success(&self, _now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= CLOSE_AFTER_SUCCESSES {
                    info!(breaker = %self.name, "Recovered, closing");
                    inner.state = BreakerState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.last_failure = Some(now);
        match inner.state {
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.failures,
                        "Failure threshold reached, opening"
                    );
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                warn!(breaker = %self.name, "Probe failed, reopening");
                inner.state = BreakerState::Open;
                inner.successes = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Run `fut` through the breaker. The lock is never held across the await.
    pub async fn execute<T, Fut>(&self, fut: Fut) -> Result<T, GatewayError>
    where
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.check_allowed(Utc::now())?;
        match fut.await {
            Ok(value) => {
                self.record_success(Utc::now());
                Ok(value)
            }
            Err(err) => {
                self.record_failure(Utc::now());
                Err(err)
            }
        }
    }
}
