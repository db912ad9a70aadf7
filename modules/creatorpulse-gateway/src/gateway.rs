//! Gateway orchestrator. One entry point per request: admission (key,
//! permission, rate), routed dispatch under the retry executor, tracking,
//! and response decoration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use creatorpulse_common::{redact_headers, redact_params, GatewayError, Platform};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::keys::ApiKeyManager;
use crate::limiter::{FixedWindowLimiter, RateDecision};
use crate::retry::RetryExecutor;
use crate::router::{GatewayRequest, GatewayResponse, Router};

/// How many per-request timings the ring keeps.
const TIMINGS_RING_SIZE: usize = 1000;

/// A failed request, paired with the correlation id callers can quote.
#[derive(Debug)]
pub struct GatewayFailure {
    pub request_id: String,
    pub error: GatewayError,
}

/// One completed (or failed) request, as published to the tracking sink.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEvent {
    pub request_id: String,
    pub platform: Platform,
    pub method: String,
    pub endpoint: String,
    pub api_key_id: Option<String>,
    pub status: u16,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Downstream consumer of request events (telemetry, billing). The default
/// sink just logs.
pub trait TrackingSink: Send + Sync {
    fn record(&self, event: &RequestEvent);
}

pub struct LogSink;

impl TrackingSink for LogSink {
    fn record(&self, event: &RequestEvent) {
        info!(
            request_id = %event.request_id,
            platform = %event.platform,
            method = %event.method,
            endpoint = %event.endpoint,
            status = event.status,
            duration_ms = event.duration_ms,
            "Request tracked"
        );
    }
}

#[derive(Debug, Default)]
pub struct GatewayMetrics {
    total_requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rate_limit_hits: AtomicU64,
    active_connections: AtomicI64,
    timings: Mutex<std::collections::VecDeque<(String, u64)>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub rate_limit_hits: u64,
    pub active_connections: i64,
    pub avg_duration_ms: f64,
}

impl GatewayMetrics {
    fn record_timing(&self, request_id: &str, duration_ms: u64) {
        let mut timings = self.timings.lock().expect("metrics lock poisoned");
        timings.push_back((request_id.to_string(), duration_ms));
        while timings.len() > TIMINGS_RING_SIZE {
            timings.pop_front();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let timings = self.timings.lock().expect("metrics lock poisoned");
        let avg = if timings.is_empty() {
            0.0
        } else {
            timings.iter().map(|(_, ms)| *ms as f64).sum::<f64>() / timings.len() as f64
        };
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            avg_duration_ms: avg,
        }
    }

    pub fn rate_limit_hits(&self) -> u64 {
        self.rate_limit_hits.load(Ordering::Relaxed)
    }
}

/// Decrements `active_connections` on every exit path.
struct ConnectionGuard<'a>(&'a GatewayMetrics);

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.0.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct ApiGateway {
    keys: Arc<ApiKeyManager>,
    router: Arc<Router>,
    limiters: HashMap<Platform, Arc<FixedWindowLimiter>>,
    retry: RetryExecutor,
    tracking: Arc<dyn TrackingSink>,
    metrics: Arc<GatewayMetrics>,
}

impl ApiGateway {
    pub fn new(
        keys: Arc<ApiKeyManager>,
        router: Arc<Router>,
        limiters: HashMap<Platform, Arc<FixedWindowLimiter>>,
        retry: RetryExecutor,
        tracking: Arc<dyn TrackingSink>,
    ) -> Self {
        Self {
            keys,
            router,
            limiters,
            retry,
            tracking,
            metrics: Arc::new(GatewayMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Serve one request end to end. Errors come back already folded into
    /// the stable taxonomy, tagged with the request's correlation id.
    pub async fn handle(&self, req: GatewayRequest) -> Result<GatewayResponse, GatewayFailure> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        debug!(
            request_id = %request_id,
            platform = %req.platform,
            method = %req.method,
            endpoint = %req.endpoint,
            headers = ?redact_headers(&req.headers),
            params = ?redact_params(&req.params),
            "Request received"
        );

        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .active_connections
            .fetch_add(1, Ordering::Relaxed);
        let _guard = ConnectionGuard(&self.metrics);

        let api_key_id = Mutex::new(None::<String>);
        let result = self.admit_and_dispatch(&req, &request_id, &api_key_id).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let status = match &result {
            Ok(resp) => resp.status,
            Err(err) => err.status(),
        };
        match &result {
            Ok(_) => self.metrics.successes.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.metrics.failures.fetch_add(1, Ordering::Relaxed),
        };
        self.metrics.record_timing(&request_id, duration_ms);

        self.tracking.record(&RequestEvent {
            request_id: request_id.clone(),
            platform: req.platform,
            method: req.method.to_string(),
            endpoint: req.endpoint.clone(),
            api_key_id: api_key_id.into_inner().expect("request-local lock"),
            status,
            duration_ms,
            timestamp: Utc::now(),
        });

        match result {
            Ok(mut resp) => {
                resp.headers
                    .insert("X-Response-Time".to_string(), format!("{duration_ms}ms"));
                Ok(resp)
            }
            Err(error) => Err(GatewayFailure { request_id, error }),
        }
    }

    async fn admit_and_dispatch(
        &self,
        req: &GatewayRequest,
        request_id: &str,
        api_key_id: &Mutex<Option<String>>,
    ) -> Result<GatewayResponse, GatewayError> {
        let now = Utc::now();

        let key = self.keys.validate(&req.api_key, now)?;
        *api_key_id.lock().expect("request-local lock") = Some(key.id.clone());

        let required = format!(
            "{}:{}",
            req.platform,
            req.method.to_string().to_lowercase()
        );
        if !key.has_permission(&required) {
            return Err(GatewayError::Forbidden(required));
        }

        let limiter = self
            .limiters
            .get(&req.platform)
            .ok_or_else(|| GatewayError::HandlerNotFound(req.platform.to_string()))?;
        let admission = match limiter.check(&key.id, now) {
            RateDecision::Allowed { info } => info,
            RateDecision::Limited {
                retry_after_secs, ..
            } => {
                self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                return Err(GatewayError::RateLimitExceeded { retry_after_secs });
            }
        };

        let mut response = self
            .retry
            .run(|_attempt| self.router.dispatch(req.clone(), request_id))
            .await?;

        // Handlers that do not report their own quota get the admission view
        if response.rate_limit_info.is_none() {
            response.rate_limit_info = Some(admission);
            response
                .headers
                .insert("X-RateLimit-Limit".to_string(), admission.limit.to_string());
            response.headers.insert(
                "X-RateLimit-Remaining".to_string(),
                admission.remaining.to_string(),
            );
            response.headers.insert(
                "X-RateLimit-Reset".to_string(),
                admission.reset.timestamp().to_string(),
            );
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::RateLimits;
    use crate::retry::RetryPolicy;
    use crate::router::{HandlerResponse, Method, PlatformHandler, Route};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct OkHandler;

    #[async_trait]
    impl PlatformHandler for OkHandler {
        async fn handle(
            &self,
            _route: &Route,
            _req: &GatewayRequest,
        ) -> Result<HandlerResponse, GatewayError> {
            Ok(HandlerResponse {
                data: json!({"ok": true}),
                status: 200,
                rate_limit: None,
                cached: false,
            })
        }
    }

    struct FlakyHandler {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl PlatformHandler for FlakyHandler {
        async fn handle(
            &self,
            _route: &Route,
            _req: &GatewayRequest,
        ) -> Result<HandlerResponse, GatewayError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(GatewayError::ServiceUnavailable {
                    message: "downstream 503".into(),
                    retry_after_secs: None,
                })
            } else {
                Ok(HandlerResponse {
                    data: json!({"ok": true}),
                    status: 200,
                    rate_limit: None,
                    cached: false,
                })
            }
        }
    }

    fn gateway_with(
        handler: Arc<dyn PlatformHandler>,
        max_requests: u32,
    ) -> (ApiGateway, String) {
        let keys = Arc::new(ApiKeyManager::new());
        let created = keys.create(
            "test",
            vec!["tiktok:get".into()],
            RateLimits::default(),
            None,
            Utc::now(),
        );

        let mut router = Router::new();
        router.add_route(Route {
            path: "/profile".into(),
            methods: vec![Method::Get],
            platform: Platform::TikTok,
            target_endpoint: "/profile".into(),
            request_transform: None,
            response_transform: None,
        });
        router.register_handler(Platform::TikTok, handler);

        let limiters = HashMap::from([(
            Platform::TikTok,
            Arc::new(FixedWindowLimiter::new(60_000, max_requests)),
        )]);

        let gateway = ApiGateway::new(
            keys,
            Arc::new(router),
            limiters,
            RetryExecutor::new(RetryPolicy {
                max_retries: 2,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                multiplier: 2.0,
                jitter: false,
            }),
            Arc::new(LogSink),
        );
        (gateway, created.raw_key)
    }

    fn request(api_key: &str) -> GatewayRequest {
        GatewayRequest {
            platform: Platform::TikTok,
            endpoint: "/profile".into(),
            method: Method::Get,
            params: HashMap::new(),
            headers: HashMap::new(),
            body: None,
            api_key: api_key.to_string(),
            user_id: None,
        }
    }

    #[tokio::test]
    async fn happy_path_decorates_response() {
        let (gateway, raw_key) = gateway_with(Arc::new(OkHandler), 30);
        let resp = gateway.handle(request(&raw_key)).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.headers["X-RateLimit-Remaining"], "29");
        assert!(resp.headers.contains_key("X-Request-ID"));
        assert!(resp.headers["X-Response-Time"].ends_with("ms"));
    }

    #[tokio::test]
    async fn invalid_key_is_401() {
        let (gateway, _) = gateway_with(Arc::new(OkHandler), 30);
        let err = gateway.handle(request("cp_wrong")).await.unwrap_err();
        assert_eq!(err.error.code(), "INVALID_API_KEY");
        assert_eq!(err.error.status(), 401);
        assert!(!err.request_id.is_empty());
    }

    #[tokio::test]
    async fn missing_permission_is_403() {
        let (gateway, raw_key) = gateway_with(Arc::new(OkHandler), 30);
        let mut req = request(&raw_key);
        req.method = Method::Post; // key only holds tiktok:get
        // Need a POST route so the failure is attributable to permissions
        let err = gateway.handle(req).await.unwrap_err();
        assert_eq!(err.error.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn over_limit_is_429_and_counted() {
        let (gateway, raw_key) = gateway_with(Arc::new(OkHandler), 2);
        gateway.handle(request(&raw_key)).await.unwrap();
        gateway.handle(request(&raw_key)).await.unwrap();

        let err = gateway.handle(request(&raw_key)).await.unwrap_err();
        assert_eq!(err.error.code(), "RATE_LIMIT_EXCEEDED");
        assert_eq!(err.error.status(), 429);
        assert!(err.error.retry_after_secs().unwrap() <= 60);
        assert_eq!(gateway.metrics().rate_limit_hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn downstream_503_retried_to_success() {
        let (gateway, raw_key) = gateway_with(
            Arc::new(FlakyHandler {
                failures_left: AtomicU32::new(2),
            }),
            30,
        );
        let resp = gateway.handle(request(&raw_key)).await.unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn metrics_reflect_outcomes() {
        let (gateway, raw_key) = gateway_with(Arc::new(OkHandler), 30);
        gateway.handle(request(&raw_key)).await.unwrap();
        let _ = gateway.handle(request("cp_bad")).await;

        let snapshot = gateway.metrics().snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.active_connections, 0);
    }
}
