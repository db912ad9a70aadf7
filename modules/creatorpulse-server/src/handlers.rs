//! Platform dispatch: gateway requests become queued scrape jobs; queue
//! workers start the actor runs behind the circuit breaker and hand them to
//! the run tracker.

use std::collections::HashMap;
use std::sync::Arc;

use apify_client::{ActorApi, ActorRun, ApifyError, StartOptions, Webhook, WebhookRegistration};
use async_trait::async_trait;
use chrono::Utc;
use creatorpulse_common::{GatewayError, Platform};
use creatorpulse_gateway::{
    CircuitBreaker, GatewayRequest, HandlerResponse, PlatformHandler, RetryExecutor, Route,
};
use creatorpulse_ingest::RunTracker;
use creatorpulse_queue::{Job, JobData, JobHandler, JobOptions, JobQueue};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Actor id for the Instagram profile scraper.
const INSTAGRAM_PROFILE_SCRAPER: &str = "shu8hvrXbJbY3Eb9W";

/// Actor id for the TikTok profile scraper.
const TIKTOK_PROFILE_SCRAPER: &str = "GdWCkxBtKWOsKjdch";

/// Actor id for the YouTube channel scraper.
const YOUTUBE_CHANNEL_SCRAPER: &str = "h7sDV53CddomktSi5";

/// Actor id for the Twitter profile scraper.
const TWITTER_PROFILE_SCRAPER: &str = "61RPP7dywgiy0JPD0";

/// Actor id for the LinkedIn profile scraper.
const LINKEDIN_PROFILE_SCRAPER: &str = "PEgClm7RgRD7YO94b";

/// Deployment default actor per platform; overridable per platform via
/// configuration.
pub fn default_actor_id(platform: Platform) -> &'static str {
    match platform {
        Platform::Instagram => INSTAGRAM_PROFILE_SCRAPER,
        Platform::TikTok => TIKTOK_PROFILE_SCRAPER,
        Platform::YouTube => YOUTUBE_CHANNEL_SCRAPER,
        Platform::Twitter => TWITTER_PROFILE_SCRAPER,
        Platform::LinkedIn => LINKEDIN_PROFILE_SCRAPER,
    }
}

/// Fold an actor-client failure into the gateway taxonomy.
pub fn map_actor_error(err: ApifyError) -> GatewayError {
    match err {
        ApifyError::Network(message) => GatewayError::ServiceUnavailable {
            message,
            retry_after_secs: None,
        },
        ApifyError::Api { status, message } => GatewayError::Platform { status, message },
        ApifyError::Parse(message) => GatewayError::Internal(message),
        ApifyError::WaitDeadline { max_secs, .. } => GatewayError::Timeout(max_secs * 1000),
    }
}

/// Queueing wrapper over the actor client: dispatch goes through the
/// scraping queue, while direct run access delegates to the client.
pub struct QueuedActorRunner {
    api: Arc<dyn ActorApi>,
    queue: Arc<JobQueue>,
}

impl QueuedActorRunner {
    pub fn new(api: Arc<dyn ActorApi>, queue: Arc<JobQueue>) -> Self {
        Self { api, queue }
    }

    /// Start a run immediately, delegating to the actor client.
    pub async fn start_now(
        &self,
        actor_id: &str,
        input: Value,
        opts: StartOptions,
    ) -> Result<ActorRun, ApifyError> {
        self.api.start(actor_id, input, opts).await
    }

    /// Register run-event webhooks for an actor, delegating to the client.
    pub async fn register_webhook(
        &self,
        actor_id: &str,
        registration: WebhookRegistration,
    ) -> Result<Webhook, ApifyError> {
        self.api.register_webhook(actor_id, registration).await
    }

    /// Queue a scrape instead of starting it inline; the worker pool owns
    /// the actual start call.
    pub fn enqueue_scrape(
        &self,
        platform: Platform,
        actor_id: &str,
        input: Value,
        priority: i32,
        user_id: Option<String>,
    ) -> Job {
        self.queue.enqueue(
            format!("scrape:{platform}"),
            JobData {
                platform: Some(platform),
                actor_id: actor_id.to_string(),
                input,
                user_id,
                metadata: None,
            },
            JobOptions {
                priority,
                ..Default::default()
            },
        )
    }
}

/// The gateway-side platform handler: turns a routed request into a queued
/// scrape job and acknowledges with the job id.
pub struct ActorDispatchHandler {
    runner: Arc<QueuedActorRunner>,
    actors: HashMap<Platform, String>,
}

impl ActorDispatchHandler {
    pub fn new(runner: Arc<QueuedActorRunner>, actors: HashMap<Platform, String>) -> Self {
        Self { runner, actors }
    }
}

#[async_trait]
impl PlatformHandler for ActorDispatchHandler {
    async fn handle(
        &self,
        route: &Route,
        req: &GatewayRequest,
    ) -> Result<HandlerResponse, GatewayError> {
        let actor_id = self
            .actors
            .get(&route.platform)
            .ok_or_else(|| GatewayError::HandlerNotFound(route.platform.to_string()))?;

        // The actor input carries everything the request declared; path
        // params (e.g. username) ride alongside the body.
        let input = json!({
            "endpoint": route.target_endpoint,
            "params": req.params,
            "body": req.body,
        });

        let job = self.runner.enqueue_scrape(
            route.platform,
            actor_id,
            input,
            0,
            req.user_id.clone(),
        );
        info!(
            job_id = %job.id,
            platform = %route.platform,
            actor_id = %actor_id,
            "Scrape queued"
        );

        Ok(HandlerResponse {
            data: json!({
                "jobId": job.id,
                "queue": job.queue,
                "status": "queued",
            }),
            status: 202,
            rate_limit: None,
            cached: false,
        })
    }
}

/// Worker-side handler for the scraping queue: starts the actor run behind
/// the breaker, registers the completion webhook, and begins tracking.
pub struct ScrapeJobHandler {
    runner: Arc<QueuedActorRunner>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
    tracker: Arc<RunTracker>,
    /// Public ingress URL the actor service calls back, when reachable.
    webhook_url: Option<String>,
    actor_timeout_secs: u32,
}

impl ScrapeJobHandler {
    pub fn new(
        runner: Arc<QueuedActorRunner>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryExecutor,
        tracker: Arc<RunTracker>,
        webhook_url: Option<String>,
        actor_timeout_secs: u32,
    ) -> Self {
        Self {
            runner,
            breaker,
            retry,
            tracker,
            webhook_url,
            actor_timeout_secs,
        }
    }
}

#[async_trait]
impl JobHandler for ScrapeJobHandler {
    async fn process(&self, job: &Job) -> anyhow::Result<Value> {
        let platform = job
            .data
            .platform
            .ok_or_else(|| anyhow::anyhow!("scrape job {} has no platform", job.id))?;
        let actor_id = job.data.actor_id.clone();
        let input = job.data.input.clone();
        let opts = StartOptions {
            timeout_secs: Some(self.actor_timeout_secs),
            ..Default::default()
        };

        let run = self
            .breaker
            .execute(self.retry.run(|_attempt| {
                let runner = Arc::clone(&self.runner);
                let actor_id = actor_id.clone();
                let input = input.clone();
                let opts = opts.clone();
                async move {
                    runner
                        .start_now(&actor_id, input, opts)
                        .await
                        .map_err(map_actor_error)
                }
            }))
            .await
            .map_err(anyhow::Error::new)?;

        if let Some(url) = &self.webhook_url {
            let registration = WebhookRegistration {
                event_types: vec![
                    "ACTOR.RUN.SUCCEEDED".into(),
                    "ACTOR.RUN.FAILED".into(),
                    "ACTOR.RUN.ABORTED".into(),
                    "ACTOR.RUN.TIMED_OUT".into(),
                ],
                request_url: url.clone(),
                payload_template: None,
            };
            if let Err(err) = self.runner.register_webhook(&actor_id, registration).await {
                // Polling still follows the run; webhook delivery is the
                // fast path, not the only one
                warn!(run_id = %run.id, error = %err, "Webhook registration failed");
            }
        }

        self.tracker.track(&run.id, platform);
        info!(
            job_id = %job.id,
            run_id = %run.id,
            platform = %platform,
            "Actor run started"
        );
        Ok(json!({"runId": run.id, "startedAt": Utc::now()}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_platform_has_a_default_actor() {
        for platform in Platform::ALL {
            assert!(!default_actor_id(platform).is_empty());
        }
    }

    #[test]
    fn actor_errors_map_into_the_taxonomy() {
        let err = map_actor_error(ApifyError::Api {
            status: 429,
            message: "slow down".into(),
        });
        assert_eq!(err.code(), "PLATFORM_ERROR");
        assert_eq!(err.status(), 429);
        assert!(err.is_retryable());

        let err = map_actor_error(ApifyError::Network("connection refused".into()));
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");

        let err = map_actor_error(ApifyError::WaitDeadline {
            run_id: "r".into(),
            max_secs: 120,
        });
        assert_eq!(err.code(), "TIMEOUT");
    }
}
