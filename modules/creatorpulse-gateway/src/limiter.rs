//! Admission limiters. Two local variants (fixed window, token bucket) share
//! one decision contract, plus a sliding-window variant that counts in a
//! shared store for multi-process deployments. Checks never block: they
//! admit or reject immediately with a retry-after hint.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Optional identifier rewrite applied before state lookup, so callers can
/// scope counters (per key, per key+platform) without a second limiter.
pub type KeyGen = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Snapshot of a limiter's view of one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset: DateTime<Utc>,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { info: RateLimitInfo },
    Limited {
        info: RateLimitInfo,
        retry_after_secs: u64,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }

    pub fn info(&self) -> RateLimitInfo {
        match self {
            RateDecision::Allowed { info } | RateDecision::Limited { info, .. } => *info,
        }
    }
}

// ---------------------------------------------------------------------------
// Fixed window
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct WindowState {
    requests: u32,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
}

/// Counts admissions inside fixed windows of `window_ms`. State for an
/// identifier is replaced, not carried over, once its window has passed.
pub struct FixedWindowLimiter {
    window_ms: i64,
    max_requests: u32,
    key_gen: Option<KeyGen>,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl FixedWindowLimiter {
    pub fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms: window_ms as i64,
            max_requests,
            key_gen: None,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_key_gen(mut self, key_gen: KeyGen) -> Self {
        self.key_gen = Some(key_gen);
        self
    }

    fn key(&self, identifier: &str) -> String {
        match &self.key_gen {
            Some(f) => f(identifier),
            None => identifier.to_string(),
        }
    }

    fn fresh_window(&self, now: DateTime<Utc>) -> WindowState {
        WindowState {
            requests: 0,
            window_start: now,
            window_end: now + chrono::Duration::milliseconds(self.window_ms),
        }
    }

    /// Admit or reject one request. Increments the counter only on admission.
    pub fn check(&self, identifier: &str, now: DateTime<Utc>) -> RateDecision {
        let key = self.key(identifier);
        let mut windows = self.windows.lock().expect("limiter lock poisoned");
        let state = windows.entry(key).or_insert_with(|| self.fresh_window(now));

        if now > state.window_end {
            *state = self.fresh_window(now);
        }

        if state.requests < self.max_requests {
            state.requests += 1;
            RateDecision::Allowed {
                info: RateLimitInfo {
                    limit: self.max_requests,
                    remaining: self.max_requests - state.requests,
                    reset: state.window_end,
                },
            }
        } else {
            let wait_ms = (state.window_end - now).num_milliseconds().max(0);
            RateDecision::Limited {
                info: RateLimitInfo {
                    limit: self.max_requests,
                    remaining: 0,
                    reset: state.window_end,
                },
                retry_after_secs: (wait_ms as u64).div_ceil(1000),
            }
        }
    }

    /// Read the current window without consuming an admission.
    pub fn info(&self, identifier: &str, now: DateTime<Utc>) -> RateLimitInfo {
        let key = self.key(identifier);
        let windows = self.windows.lock().expect("limiter lock poisoned");
        match windows.get(&key) {
            Some(state) if now <= state.window_end => RateLimitInfo {
                limit: self.max_requests,
                remaining: self.max_requests.saturating_sub(state.requests),
                reset: state.window_end,
            },
            _ => RateLimitInfo {
                limit: self.max_requests,
                remaining: self.max_requests,
                reset: now + chrono::Duration::milliseconds(self.window_ms),
            },
        }
    }

    /// Discard windows that expired more than `grace` ago.
    pub fn sweep(&self, now: DateTime<Utc>, grace: Duration) {
        let cutoff = now - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let mut windows = self.windows.lock().expect("limiter lock poisoned");
        let before = windows.len();
        windows.retain(|_, state| state.window_end >= cutoff);
        let swept = before - windows.len();
        if swept > 0 {
            debug!(swept, "Rate-limit windows purged");
        }
    }

    /// Spawn a background task purging stale windows every `interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                limiter.sweep(Utc::now(), interval);
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Token bucket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// Lazily refilled token bucket: burst up to `capacity`, sustained rate
/// `refill_per_sec`.
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_sec: f64,
    tokens_required: f64,
    key_gen: Option<KeyGen>,
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl TokenBucketLimiter {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            tokens_required: 1.0,
            key_gen: None,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_tokens_required(mut self, tokens: f64) -> Self {
        self.tokens_required = tokens;
        self
    }

    pub fn with_key_gen(mut self, key_gen: KeyGen) -> Self {
        self.key_gen = Some(key_gen);
        self
    }

    fn key(&self, identifier: &str) -> String {
        match &self.key_gen {
            Some(f) => f(identifier),
            None => identifier.to_string(),
        }
    }

    fn refilled(&self, state: BucketState, now: DateTime<Utc>) -> f64 {
        let elapsed_secs = (now - state.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        (state.tokens + elapsed_secs * self.refill_per_sec).min(self.capacity)
    }

    pub fn check(&self, identifier: &str, now: DateTime<Utc>) -> RateDecision {
        let key = self.key(identifier);
        let mut buckets = self.buckets.lock().expect("limiter lock poisoned");
        let state = buckets.entry(key).or_insert(BucketState {
            tokens: self.capacity,
            last_refill: now,
        });

        state.tokens = self.refilled(*state, now);
        state.last_refill = now;

        if state.tokens >= self.tokens_required {
            state.tokens -= self.tokens_required;
            RateDecision::Allowed {
                info: self.info_for(state.tokens, now),
            }
        } else {
            let deficit = self.tokens_required - state.tokens;
            let wait_secs = (deficit / self.refill_per_sec).ceil() as u64;
            RateDecision::Limited {
                info: self.info_for(state.tokens, now),
                retry_after_secs: wait_secs.max(1),
            }
        }
    }

    pub fn info(&self, identifier: &str, now: DateTime<Utc>) -> RateLimitInfo {
        let key = self.key(identifier);
        let buckets = self.buckets.lock().expect("limiter lock poisoned");
        let tokens = match buckets.get(&key) {
            Some(state) => self.refilled(*state, now),
            None => self.capacity,
        };
        self.info_for(tokens, now)
    }

    fn info_for(&self, tokens: f64, now: DateTime<Utc>) -> RateLimitInfo {
        let missing = self.capacity - tokens;
        let full_in_secs = if self.refill_per_sec > 0.0 {
            (missing / self.refill_per_sec).ceil() as i64
        } else {
            0
        };
        RateLimitInfo {
            limit: self.capacity as u32,
            remaining: tokens.floor() as u32,
            reset: now + chrono::Duration::seconds(full_in_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Sliding window over a shared store
// ---------------------------------------------------------------------------

/// Sorted-set operations the sliding window needs from a shared store.
/// The production implementation points at the deployment's shared store;
/// the in-memory one backs tests and single-process runs.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Drop entries scored strictly below `min_score`.
    async fn remove_below(&self, key: &str, min_score: i64) -> anyhow::Result<()>;
    /// Count remaining entries.
    async fn count(&self, key: &str) -> anyhow::Result<u64>;
    /// Add one entry with the given score.
    async fn add(&self, key: &str, member: &str, score: i64) -> anyhow::Result<()>;
    /// Bound the key's lifetime so abandoned identifiers age out.
    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()>;
}

/// In-memory sorted-set store.
pub struct MemoryWindowStore {
    sets: Mutex<HashMap<String, BTreeMap<i64, Vec<String>>>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn remove_below(&self, key: &str, min_score: i64) -> anyhow::Result<()> {
        let mut sets = self.sets.lock().expect("store lock poisoned");
        if let Some(set) = sets.get_mut(key) {
            *set = set.split_off(&min_score);
        }
        Ok(())
    }

    async fn count(&self, key: &str) -> anyhow::Result<u64> {
        let sets = self.sets.lock().expect("store lock poisoned");
        Ok(sets
            .get(key)
            .map(|set| set.values().map(|v| v.len() as u64).sum())
            .unwrap_or(0))
    }

    async fn add(&self, key: &str, member: &str, score: i64) -> anyhow::Result<()> {
        let mut sets = self.sets.lock().expect("store lock poisoned");
        sets.entry(key.to_string())
            .or_default()
            .entry(score)
            .or_default()
            .push(member.to_string());
        Ok(())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Sliding-window limiter counting admissions in a shared store, for
/// deployments where several processes must share one quota.
pub struct SlidingWindowLimiter<S: WindowStore> {
    store: S,
    window_ms: i64,
    max_requests: u64,
    prefix: String,
}

impl<S: WindowStore> SlidingWindowLimiter<S> {
    pub fn new(store: S, window_ms: u64, max_requests: u64) -> Self {
        Self {
            store,
            window_ms: window_ms as i64,
            max_requests,
            prefix: "ratelimit".to_string(),
        }
    }

    pub async fn check(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<RateDecision> {
        let key = format!("{}:{}", self.prefix, identifier);
        let now_ms = now.timestamp_millis();
        let window_start = now_ms - self.window_ms;

        self.store.remove_below(&key, window_start).await?;
        let used = self.store.count(&key).await?;

        let reset = now + chrono::Duration::milliseconds(self.window_ms);
        if used < self.max_requests {
            let member = format!("{now_ms}-{used}");
            self.store.add(&key, &member, now_ms).await?;
            self.store
                .expire(&key, Duration::from_millis(self.window_ms as u64 * 2))
                .await?;
            Ok(RateDecision::Allowed {
                info: RateLimitInfo {
                    limit: self.max_requests as u32,
                    remaining: (self.max_requests - used - 1) as u32,
                    reset,
                },
            })
        } else {
            Ok(RateDecision::Limited {
                info: RateLimitInfo {
                    limit: self.max_requests as u32,
                    remaining: 0,
                    reset,
                },
                retry_after_secs: (self.window_ms as u64).div_ceil(1000),
            })
        }
    }
}
