//! Root composition. Everything is constructed once here and injected;
//! no module reaches for a global.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use apify_client::{ActorApi, ApifyClient};
use axum::{
    extract::{Path, State},
    http::{HeaderName, HeaderValue, Method as HttpMethod, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use creatorpulse_common::{
    error::ErrorBody, Config, GatewayError, Platform,
};
use creatorpulse_gateway::{
    gateway::LogSink, ApiGateway, ApiKeyManager, BreakerConfig, CircuitBreaker,
    FixedWindowLimiter, GatewayRequest, Method, RateLimits, RetryExecutor, RetryPolicy, Route,
    Router as GatewayRouter,
};
use creatorpulse_ingest::{
    handler::{spawn_dlq_monitor, spawn_retry_sweeper, LogAlertSink},
    tracker::LogObserver,
    webhook_routes, CreatorStore, Enqueuer, IngressState, MemoryCreatorStore,
    MemoryWebhookEventStore, PgCreatorStore, PgWebhookEventStore, RunTracker, WebhookEventStatus,
    WebhookEventStore, WebhookProcessor,
};
use creatorpulse_pipeline::{CreatorLookup, PipelineConfig, ResultPipeline};
use creatorpulse_queue::{
    assess_health, Job, JobData, JobHandler, JobOptions, JobQueue, QueueConfig, QueueHealth,
    QueueManager, WorkerPool, SCRAPING, WEBHOOK_PROCESSING,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::handlers::{
    default_actor_id, ActorDispatchHandler, QueuedActorRunner, ScrapeJobHandler,
};

/// Webhook events get this many processing attempts before dead-lettering.
const WEBHOOK_MAX_ATTEMPTS: u32 = 3;

/// Cadence of the background sweepers (rate-limit windows, webhook retries,
/// DLQ depth).
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct App {
    pub config: Config,
    pub keys: Arc<ApiKeyManager>,
    pub gateway: Arc<ApiGateway>,
    pub queues: Arc<QueueManager>,
    pub breaker: Arc<CircuitBreaker>,
    pub event_store: Arc<dyn WebhookEventStore>,
    pub creators: Arc<dyn CreatorStore>,
    pub pipeline: Arc<ResultPipeline>,
    pub processor: Arc<WebhookProcessor>,
    pub tracker: Arc<RunTracker>,
    pub limiters: HashMap<Platform, Arc<FixedWindowLimiter>>,
    /// Gates backlog-based health signals to the draining instance.
    pub is_leader: bool,
    runner: Arc<QueuedActorRunner>,
}

impl App {
    /// Production assembly: Postgres-backed stores, migrations applied.
    pub async fn build_postgres(config: Config) -> anyhow::Result<Arc<App>> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_pool_max)
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let creators = Arc::new(PgCreatorStore::new(pool.clone()));
        Ok(Self::assemble(
            config,
            Arc::new(PgWebhookEventStore::new(pool)),
            creators.clone(),
            creators,
        ))
    }

    /// In-memory assembly for tests and local dry runs.
    pub fn build_memory(config: Config) -> Arc<App> {
        let creators = Arc::new(MemoryCreatorStore::new());
        Self::assemble(
            config,
            Arc::new(MemoryWebhookEventStore::new()),
            creators.clone(),
            creators,
        )
    }

    fn assemble(
        config: Config,
        event_store: Arc<dyn WebhookEventStore>,
        creators: Arc<dyn CreatorStore>,
        lookup: Arc<dyn CreatorLookup>,
    ) -> Arc<App> {
        let api: Arc<dyn ActorApi> = Arc::new(ApifyClient::new(config.apify_token.clone()));

        let queues = Arc::new(QueueManager::standard(QueueConfig {
            concurrency: config.queue.concurrency,
            max_retries: config.queue.max_retries,
            backoff_initial_ms: config.queue.delay_on_failure_ms,
            backoff_multiplier: config.retry.backoff_multiplier,
            ..Default::default()
        }));

        let tracker = Arc::new(RunTracker::new(Arc::clone(&api), Arc::new(LogObserver)));
        let pipeline = Arc::new(ResultPipeline::new(lookup, PipelineConfig::default()));

        // Actor roster: per-platform override or the deployment default
        let actors: HashMap<Platform, String> = Platform::ALL
            .into_iter()
            .map(|p| {
                let actor = config
                    .platforms
                    .get(&p)
                    .and_then(|pc| pc.actor_id.clone())
                    .unwrap_or_else(|| default_actor_id(p).to_string());
                (p, actor)
            })
            .collect();
        let actor_platforms: HashMap<String, Platform> =
            actors.iter().map(|(p, a)| (a.clone(), *p)).collect();

        let processor = Arc::new(WebhookProcessor::new(
            Arc::clone(&event_store),
            Arc::clone(&api),
            Arc::clone(&pipeline),
            Arc::clone(&creators),
            Arc::clone(&tracker),
            Arc::new(LogAlertSink),
            actor_platforms,
        ));

        let breaker = Arc::new(CircuitBreaker::new(
            "actor-service",
            BreakerConfig::default(),
        ));
        let retry = RetryExecutor::new(RetryPolicy::from(&config.retry));

        let scraping_queue = queues.get(SCRAPING).expect("standard queue set");
        let runner = Arc::new(QueuedActorRunner::new(
            Arc::clone(&api),
            scraping_queue,
        ));
        let dispatch = Arc::new(ActorDispatchHandler::new(Arc::clone(&runner), actors));

        let mut router = GatewayRouter::new();
        for platform in Platform::ALL {
            router.add_route(Route {
                path: format!("/{platform}/profile"),
                methods: vec![Method::Get, Method::Post],
                platform,
                target_endpoint: "/profile".to_string(),
                request_transform: None,
                response_transform: None,
            });
            router.add_route(Route {
                path: format!("/{platform}/profile/{{username}}"),
                methods: vec![Method::Get],
                platform,
                target_endpoint: "/profile".to_string(),
                request_transform: None,
                response_transform: None,
            });
            router.register_handler(platform, dispatch.clone());
        }

        let limiters: HashMap<Platform, Arc<FixedWindowLimiter>> = config
            .platforms
            .iter()
            .map(|(platform, pc)| {
                (
                    *platform,
                    Arc::new(FixedWindowLimiter::new(
                        pc.rate_window_ms,
                        pc.rate_max_requests,
                    )),
                )
            })
            .collect();

        let keys = Arc::new(ApiKeyManager::new());
        let gateway = Arc::new(ApiGateway::new(
            Arc::clone(&keys),
            Arc::new(router),
            limiters.clone(),
            retry,
            Arc::new(LogSink),
        ));

        Arc::new(App {
            config,
            keys,
            gateway,
            queues,
            breaker,
            event_store,
            creators,
            pipeline,
            processor,
            tracker,
            limiters,
            is_leader: true,
            runner,
        })
    }

    /// Spawn worker pools and sweepers. Handles are returned so a caller
    /// that wants a clean shutdown can keep them.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let scraping_queue = self.queues.get(SCRAPING).expect("standard queue set");
        let scrape_handler = Arc::new(ScrapeJobHandler::new(
            Arc::clone(&self.runner),
            Arc::clone(&self.breaker),
            RetryExecutor::new(RetryPolicy::from(&self.config.retry)),
            Arc::clone(&self.tracker),
            self.config.public_webhook_url.clone(),
            (self.config.actor_timeout_ms / 1000) as u32,
        ));
        handles.push(Arc::new(WorkerPool::new(scraping_queue, scrape_handler)).spawn());

        let webhook_queue = self
            .queues
            .get(WEBHOOK_PROCESSING)
            .expect("standard queue set");
        let webhook_handler = Arc::new(WebhookJobHandler {
            processor: Arc::clone(&self.processor),
        });
        handles.push(Arc::new(WorkerPool::new(webhook_queue, webhook_handler)).spawn());

        handles.push(spawn_retry_sweeper(
            Arc::clone(&self.processor),
            SWEEP_INTERVAL,
        ));
        handles.push(spawn_dlq_monitor(
            Arc::clone(&self.event_store),
            Arc::new(LogAlertSink),
            SWEEP_INTERVAL,
        ));

        for limiter in self.limiters.values() {
            handles.push(limiter.spawn_sweeper(SWEEP_INTERVAL));
        }

        let keys = Arc::clone(&self.keys);
        handles.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;
                keys.sweep_cache(Utc::now());
            }
        }));

        info!("Background workers and sweepers started");
        info!("{}", self.queues);
        handles
    }
}

/// Queue-job handler that drives the webhook processor.
struct WebhookJobHandler {
    processor: Arc<WebhookProcessor>,
}

#[async_trait::async_trait]
impl JobHandler for WebhookJobHandler {
    async fn process(&self, job: &Job) -> anyhow::Result<Value> {
        let event_id = job
            .data
            .input
            .get("webhookEventId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("job {} carries no webhookEventId", job.id))?;
        self.processor.process_event(event_id, Utc::now()).await?;
        Ok(json!({"eventId": event_id}))
    }
}

/// Bridges accepted webhook events onto the processing queue.
struct QueueEnqueuer {
    queue: Arc<JobQueue>,
}

impl Enqueuer for QueueEnqueuer {
    fn enqueue(&self, event_id: &str) {
        self.queue.enqueue(
            "webhook-event",
            JobData {
                platform: None,
                actor_id: String::new(),
                input: json!({"webhookEventId": event_id}),
                user_id: None,
                metadata: None,
            },
            JobOptions::default(),
        );
    }
}

// ---------------------------------------------------------------------------
// HTTP surface
// ---------------------------------------------------------------------------

pub fn http_router(app: Arc<App>) -> Router {
    let mut secrets = HashMap::new();
    if !app.config.webhook_secret.is_empty() {
        secrets.insert("apify".to_string(), app.config.webhook_secret.clone());
    }
    let ingress_state = Arc::new(IngressState {
        secrets,
        store: Arc::clone(&app.event_store),
        enqueuer: Arc::new(QueueEnqueuer {
            queue: app
                .queues
                .get(WEBHOOK_PROCESSING)
                .expect("standard queue set"),
        }),
        development: app.config.environment.is_development(),
        max_attempts: WEBHOOK_MAX_ATTEMPTS,
    });

    let cors_enabled = app.config.cors_enabled;
    let mut router = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/gateway", post(gateway_handler))
        .route("/admin/queues/{name}/pause", post(queue_pause))
        .route("/admin/queues/{name}/resume", post(queue_resume))
        .route("/admin/queues/{name}/clean", post(queue_clean))
        .route("/admin/webhooks/retry-dlq", post(retry_dlq))
        .route("/admin/keys", post(create_key))
        .route("/admin/keys/{id}/rotate", post(rotate_key))
        .route("/admin/keys/{id}/revoke", post(revoke_key))
        .with_state(app)
        .merge(webhook_routes(ingress_state));

    if cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_methods([
                    HttpMethod::GET,
                    HttpMethod::POST,
                    HttpMethod::PUT,
                    HttpMethod::DELETE,
                    HttpMethod::OPTIONS,
                ])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-api-key"),
                ])
                .allow_origin(tower_http::cors::Any),
        );
    }
    router
}

/// Wire shape of a gateway request.
#[derive(Debug, Deserialize)]
struct GatewayRequestBody {
    platform: Platform,
    endpoint: String,
    method: String,
    #[serde(default)]
    params: HashMap<String, String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    body: Option<Value>,
    #[serde(rename = "apiKey")]
    api_key: String,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

fn error_response(request_id: &str, err: &GatewayError) -> Response {
    let mut response = (
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ErrorBody::from_error(err, request_id)),
    )
        .into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HeaderName::from_static("x-request-id"), value);
    }
    if let Some(secs) = err.retry_after_secs() {
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            headers.insert(axum::http::header::RETRY_AFTER, value);
        }
    }
    response
}

async fn gateway_handler(
    State(app): State<Arc<App>>,
    Json(body): Json<GatewayRequestBody>,
) -> Response {
    let method = match Method::from_str(&body.method) {
        Ok(m) => m,
        Err(_) => {
            return error_response(
                &uuid::Uuid::new_v4().to_string(),
                &GatewayError::RouteNotFound {
                    method: body.method.clone(),
                    path: body.endpoint.clone(),
                },
            )
        }
    };

    let request = GatewayRequest {
        platform: body.platform,
        endpoint: body.endpoint,
        method,
        params: body.params,
        headers: body.headers,
        body: body.body,
        api_key: body.api_key,
        user_id: body.user_id,
    };

    match app.gateway.handle(request).await {
        Ok(resp) => {
            let mut response = (
                StatusCode::from_u16(resp.status).unwrap_or(StatusCode::OK),
                Json(json!({
                    "data": resp.data,
                    "status": resp.status,
                    "requestId": resp.request_id,
                    "cached": resp.cached,
                    "rateLimitInfo": resp.rate_limit_info,
                })),
            )
                .into_response();
            let headers = response.headers_mut();
            for (name, value) in &resp.headers {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_str(&name.to_lowercase()),
                    HeaderValue::from_str(value),
                ) {
                    headers.insert(name, value);
                }
            }
            response
        }
        Err(failure) => error_response(&failure.request_id, &failure.error),
    }
}

async fn health(State(app): State<Arc<App>>) -> Response {
    let mut queues = serde_json::Map::new();
    let mut worst = QueueHealth::Healthy;
    for (name, queue) in app.queues.iter() {
        let health = assess_health(&queue.stats(), app.is_leader);
        if health == QueueHealth::Unhealthy
            || (health == QueueHealth::Degraded && worst == QueueHealth::Healthy)
        {
            worst = health;
        }
        queues.insert(name.clone(), json!(health));
    }

    let mut breakers = serde_json::Map::new();
    breakers.insert(
        app.breaker.name().to_string(),
        json!(app.breaker.state().to_string()),
    );

    let status = if worst == QueueHealth::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(json!({
            "status": worst,
            "queues": queues,
            "breakers": breakers,
        })),
    )
        .into_response()
}

async fn metrics(State(app): State<Arc<App>>) -> Json<Value> {
    let queue_counts: serde_json::Map<String, Value> = app
        .queues
        .iter()
        .map(|(name, queue)| (name.clone(), json!(queue.counts())))
        .collect();
    Json(json!({
        "gateway": app.gateway.metrics().snapshot(),
        "pipeline": app.pipeline.metrics().report(),
        "queues": queue_counts,
    }))
}

async fn queue_pause(State(app): State<Arc<App>>, Path(name): Path<String>) -> Response {
    with_queue(&app, &name, |q| {
        q.pause();
        json!({"paused": true})
    })
}

async fn queue_resume(State(app): State<Arc<App>>, Path(name): Path<String>) -> Response {
    with_queue(&app, &name, |q| {
        q.resume();
        json!({"paused": false})
    })
}

async fn queue_clean(State(app): State<Arc<App>>, Path(name): Path<String>) -> Response {
    with_queue(&app, &name, |q| {
        q.clean();
        json!({"cleaned": true})
    })
}

fn with_queue(app: &App, name: &str, f: impl FnOnce(&JobQueue) -> Value) -> Response {
    match app.queues.get(name) {
        Some(queue) => (StatusCode::OK, Json(f(&queue))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no such queue: {name}")})),
        )
            .into_response(),
    }
}

/// Re-drive dead-lettered webhook events with a fresh attempt budget.
async fn retry_dlq(State(app): State<Arc<App>>) -> Response {
    let dead = match app.event_store.dead_letters(100).await {
        Ok(dead) => dead,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    };

    let queue = app
        .queues
        .get(WEBHOOK_PROCESSING)
        .expect("standard queue set");
    let mut redriven = 0;
    for mut event in dead {
        event.status = WebhookEventStatus::Pending;
        event.attempts = 0;
        event.next_retry_at = None;
        event.error = None;
        if app.event_store.update(&event).await.is_ok() {
            QueueEnqueuer {
                queue: Arc::clone(&queue),
            }
            .enqueue(&event.id);
            redriven += 1;
        }
    }
    info!(redriven, "Dead-lettered webhook events re-driven");
    (StatusCode::OK, Json(json!({"redriven": redriven}))).into_response()
}

#[derive(Debug, Deserialize)]
struct CreateKeyBody {
    name: String,
    #[serde(default)]
    permissions: Vec<String>,
}

async fn create_key(State(app): State<Arc<App>>, Json(body): Json<CreateKeyBody>) -> Response {
    if body.name.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": "name is required"})),
        )
            .into_response();
    }
    let created = app.keys.create(
        body.name,
        body.permissions,
        RateLimits::default(),
        None,
        Utc::now(),
    );
    (
        StatusCode::CREATED,
        Json(json!({
            "id": created.key.id,
            // Shown exactly once; only the hash survives
            "apiKey": created.raw_key,
            "permissions": created.key.permissions,
        })),
    )
        .into_response()
}

async fn rotate_key(State(app): State<Arc<App>>, Path(id): Path<String>) -> Response {
    match app.keys.rotate(&id, Utc::now()) {
        Ok(created) => (
            StatusCode::OK,
            Json(json!({
                "id": created.key.id,
                "apiKey": created.raw_key,
                "rotatedFrom": id,
            })),
        )
            .into_response(),
        Err(err) => error_response(&uuid::Uuid::new_v4().to_string(), &err),
    }
}

#[derive(Debug, Deserialize, Default)]
struct RevokeBody {
    reason: Option<String>,
}

async fn revoke_key(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
    Json(body): Json<RevokeBody>,
) -> Response {
    let reason = body.reason;
    match app.keys.revoke(&id, reason.as_deref()) {
        Ok(()) => (StatusCode::OK, Json(json!({"revoked": true}))).into_response(),
        Err(err) => error_response(&uuid::Uuid::new_v4().to_string(), &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use creatorpulse_common::config::{Environment, PlatformConfig, QueueTuning, RetrySettings};

    fn test_config() -> Config {
        let mut platforms = HashMap::new();
        for p in Platform::ALL {
            platforms.insert(
                p,
                PlatformConfig {
                    rate_window_ms: 60_000,
                    rate_max_requests: 30,
                    api_key: String::new(),
                    timeout_ms: 30_000,
                    actor_id: None,
                },
            );
        }
        Config {
            environment: Environment::Development,
            host: "127.0.0.1".into(),
            port: 0,
            cors_enabled: false,
            platforms,
            secret_key: "0123456789abcdef0123456789abcdef".into(),
            algorithm: "aes-256-gcm".into(),
            webhook_secret: "whsec".into(),
            retry: RetrySettings {
                max_attempts: 3,
                initial_delay_ms: 10,
                max_delay_ms: 100,
                backoff_multiplier: 2.0,
            },
            database_url: "postgres://unused".into(),
            db_pool_max: 2,
            queue: QueueTuning {
                concurrency: 2,
                max_retries: 2,
                delay_on_failure_ms: 10,
            },
            apify_token: "test-token".into(),
            public_webhook_url: None,
            gateway_timeout_ms: 30_000,
            actor_timeout_ms: 120_000,
        }
    }

    #[tokio::test]
    async fn memory_assembly_wires_the_whole_plane() {
        let app = App::build_memory(test_config());
        assert_eq!(app.queues.names().len(), 4);
        assert_eq!(app.limiters.len(), 5);

        // A key created through the app validates at the gateway admission
        let created = app.keys.create(
            "test",
            vec!["tiktok:get".into()],
            RateLimits::default(),
            None,
            Utc::now(),
        );

        let request = GatewayRequest {
            platform: Platform::TikTok,
            endpoint: "/tiktok/profile".into(),
            method: Method::Get,
            params: HashMap::new(),
            headers: HashMap::new(),
            body: None,
            api_key: created.raw_key,
            user_id: None,
        };
        let resp = app.gateway.handle(request).await.unwrap();
        assert_eq!(resp.status, 202);
        assert_eq!(resp.data["status"], "queued");

        // The dispatch landed a job on the scraping queue
        let counts = app.queues.get(SCRAPING).unwrap().counts();
        assert_eq!(counts.waiting, 1);
    }

    #[tokio::test]
    async fn health_endpoint_reports_queues_and_breaker() {
        let app = App::build_memory(test_config());
        let response = health(State(app)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
