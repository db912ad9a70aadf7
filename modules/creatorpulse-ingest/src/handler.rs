//! Webhook event processing. Dequeued events are dispatched on their type:
//! successful runs pull the dataset and feed the result pipeline; failed
//! runs update sync state and raise an alert. Processing failures retry on
//! an exponential schedule until the event dead-letters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use apify_client::ActorApi;
use chrono::{DateTime, Utc};
use creatorpulse_common::Platform;
use creatorpulse_pipeline::{BatchMode, ResultPipeline, SourceMeta};
use tracing::{debug, error, info, warn};

use crate::creators::CreatorStore;
use crate::event::{WebhookEvent, WebhookEventStatus, WebhookEventStore, WebhookPayload};
use crate::tracker::RunTracker;

/// Base retry spacing; attempt n waits `2^(n-1) * 60s`.
const RETRY_BASE_SECS: i64 = 60;

/// Dead-letter depth above which the monitor raises an alert.
const DLQ_ALERT_THRESHOLD: u64 = 10;

/// Events the retry sweeper claims per pass.
const SWEEP_BATCH: usize = 10;

/// Receiver for operational alerts (DLQ depth, failed runs).
pub trait AlertSink: Send + Sync {
    fn alert(&self, kind: &str, message: &str);
}

pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, kind: &str, message: &str) {
        warn!(kind, message, "Alert");
    }
}

pub struct WebhookProcessor {
    store: Arc<dyn WebhookEventStore>,
    api: Arc<dyn ActorApi>,
    pipeline: Arc<ResultPipeline>,
    creators: Arc<dyn CreatorStore>,
    tracker: Arc<RunTracker>,
    alerts: Arc<dyn AlertSink>,
    /// Actor id → platform, built from the deployment's actor roster.
    actor_platforms: HashMap<String, Platform>,
}

impl WebhookProcessor {
    pub fn new(
        store: Arc<dyn WebhookEventStore>,
        api: Arc<dyn ActorApi>,
        pipeline: Arc<ResultPipeline>,
        creators: Arc<dyn CreatorStore>,
        tracker: Arc<RunTracker>,
        alerts: Arc<dyn AlertSink>,
        actor_platforms: HashMap<String, Platform>,
    ) -> Self {
        Self {
            store,
            api,
            pipeline,
            creators,
            tracker,
            alerts,
            actor_platforms,
        }
    }

    /// Process one stored event. The retry decision is recorded on the
    /// event itself; callers treat any `Ok` as "handled for now".
    pub async fn process_event(&self, event_id: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let Some(mut event) = self.store.get(event_id).await? else {
            anyhow::bail!("webhook event {event_id} not found");
        };
        if event.status.is_terminal() {
            debug!(event_id, status = ?event.status, "Event already settled, skipping");
            return Ok(());
        }

        event.status = WebhookEventStatus::Processing;
        event.attempts += 1;
        self.store.update(&event).await?;

        match self.dispatch(&event).await {
            Ok(()) => {
                event.status = WebhookEventStatus::Completed;
                event.processed_at = Some(now);
                event.error = None;
                self.store.update(&event).await?;
                info!(event_id, event_type = %event.event_type, "Webhook event completed");
            }
            Err(err) => {
                event.error = Some(err.to_string());
                if event.attempts < event.max_attempts {
                    let delay_secs = RETRY_BASE_SECS * 2_i64.pow(event.attempts.saturating_sub(1));
                    event.status = WebhookEventStatus::Pending;
                    event.next_retry_at = Some(now + chrono::Duration::seconds(delay_secs));
                    warn!(
                        event_id,
                        attempt = event.attempts,
                        retry_in_secs = delay_secs,
                        error = %err,
                        "Webhook event failed, will retry"
                    );
                } else {
                    event.status = WebhookEventStatus::DeadLetter;
                    error!(
                        event_id,
                        attempts = event.attempts,
                        error = %err,
                        "Webhook event exhausted retries, dead-lettered"
                    );
                }
                self.store.update(&event).await?;
            }
        }
        Ok(())
    }

    fn platform_for(&self, payload: &WebhookPayload, event: &WebhookEvent) -> anyhow::Result<Platform> {
        if let Some(platform) = self.actor_platforms.get(&payload.event_data.actor_id) {
            return Ok(*platform);
        }
        if let Some(platform) = event
            .payload
            .get("platform")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
        {
            return Ok(platform);
        }
        anyhow::bail!(
            "no platform known for actor {}",
            payload.event_data.actor_id
        )
    }

    async fn dispatch(&self, event: &WebhookEvent) -> anyhow::Result<()> {
        let payload: WebhookPayload = serde_json::from_value(event.payload.clone())?;
        let run_id = payload.event_data.actor_run_id.clone();
        let platform = self.platform_for(&payload, event)?;

        if let Some(status) = payload.terminal_status() {
            self.tracker.reconcile(&run_id, platform, status);
        }

        match event.event_type.as_str() {
            "ACTOR.RUN.SUCCEEDED" => {
                self.ingest_results(&payload, platform, &run_id).await?;
                self.creators.set_sync_state(&run_id, "synced").await?;
            }
            "ACTOR.RUN.FAILED" | "ACTOR.RUN.ABORTED" | "ACTOR.RUN.TIMED_OUT" => {
                self.creators.set_sync_state(&run_id, "failed").await?;
                self.alerts.alert(
                    "run_failed",
                    &format!(
                        "{} run {} ended {}",
                        platform, run_id, event.event_type
                    ),
                );
            }
            other => {
                debug!(event_type = other, "Ignoring non-terminal event type");
            }
        }
        Ok(())
    }

    async fn ingest_results(
        &self,
        payload: &WebhookPayload,
        platform: Platform,
        run_id: &str,
    ) -> anyhow::Result<()> {
        let dataset_id = match payload
            .resource
            .as_ref()
            .and_then(|r| r.default_dataset_id.clone())
        {
            Some(id) => id,
            // Deliveries without the resource snapshot fall back to the API
            None => self
                .api
                .run(run_id)
                .await?
                .default_dataset_id
                .ok_or_else(|| anyhow::anyhow!("run {run_id} has no dataset"))?,
        };

        let items = self.api.all_dataset_items(&dataset_id).await?;
        info!(run_id, dataset_id = %dataset_id, count = items.len(), "Dataset fetched");

        let meta = SourceMeta {
            actor_id: Some(payload.event_data.actor_id.clone()),
            run_id: Some(run_id.to_string()),
        };
        let batch = self
            .pipeline
            .process_batch(platform, items, &meta, BatchMode::Parallel)
            .await?;

        let mut upserts = 0u32;
        for outcome in &batch.outcomes {
            if let Some(creator) = &outcome.creator {
                self.creators.upsert(creator).await?;
                upserts += 1;
            }
        }
        if batch.failed > 0 {
            warn!(
                run_id,
                failed = batch.failed,
                "Some dataset items failed the pipeline"
            );
        }
        info!(run_id, upserts, failed = batch.failed, "Results ingested");
        Ok(())
    }
}

/// Rescan `pending` events whose retry time has come.
pub fn spawn_retry_sweeper(
    processor: Arc<WebhookProcessor>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let now = Utc::now();
            match processor.store.due_pending(now, SWEEP_BATCH).await {
                Ok(due) => {
                    for event in due {
                        if let Err(err) = processor.process_event(&event.id, Utc::now()).await {
                            error!(event_id = %event.id, error = %err, "Retry sweep failed");
                        }
                    }
                }
                Err(err) => error!(error = %err, "Retry sweep query failed"),
            }
        }
    })
}

/// Warn when the dead-letter set grows past the alert threshold.
pub fn spawn_dlq_monitor(
    store: Arc<dyn WebhookEventStore>,
    alerts: Arc<dyn AlertSink>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match store.dead_letter_count().await {
                Ok(count) if count > DLQ_ALERT_THRESHOLD => {
                    alerts.alert(
                        "webhook_dlq_depth",
                        &format!("{count} webhook events in the dead-letter queue"),
                    );
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "DLQ count failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::creators::MemoryCreatorStore;
    use crate::event::MemoryWebhookEventStore;
    use crate::tracker::{LogObserver, RunTracker};
    use apify_client::{
        ActorRun, ApifyError, DatasetPage, RunStatus, StartOptions, Webhook, WebhookRegistration,
    };
    use async_trait::async_trait;
    use creatorpulse_common::{PlatformIdentifiers, UnifiedCreator};
    use creatorpulse_pipeline::PipelineConfig;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct StubApi {
        items: Vec<Value>,
        fail_datasets: bool,
    }

    #[async_trait]
    impl ActorApi for StubApi {
        async fn start(
            &self,
            _actor_id: &str,
            _input: Value,
            _opts: StartOptions,
        ) -> apify_client::Result<ActorRun> {
            Err(ApifyError::Network("unused".into()))
        }

        async fn run(&self, run_id: &str) -> apify_client::Result<ActorRun> {
            Ok(ActorRun {
                id: run_id.to_string(),
                actor_id: "a1".into(),
                status: RunStatus::Succeeded,
                started_at: None,
                finished_at: None,
                default_dataset_id: Some("d1".into()),
                default_key_value_store_id: None,
                exit_code: None,
                stats: None,
            })
        }

        async fn wait_for_finish(
            &self,
            run_id: &str,
            _max_secs: u64,
        ) -> apify_client::Result<ActorRun> {
            self.run(run_id).await
        }

        async fn abort(&self, run_id: &str) -> apify_client::Result<ActorRun> {
            self.run(run_id).await
        }

        async fn dataset_items(
            &self,
            _dataset_id: &str,
            offset: u64,
            limit: u64,
        ) -> apify_client::Result<DatasetPage> {
            Ok(DatasetPage {
                items: self.items.clone(),
                offset,
                limit,
            })
        }

        async fn all_dataset_items(
            &self,
            _dataset_id: &str,
        ) -> apify_client::Result<Vec<Value>> {
            if self.fail_datasets {
                return Err(ApifyError::Api {
                    status: 500,
                    message: "dataset unavailable".into(),
                });
            }
            Ok(self.items.clone())
        }

        async fn store_record(
            &self,
            _store_id: &str,
            _key: &str,
        ) -> apify_client::Result<Value> {
            Ok(Value::Null)
        }

        async fn register_webhook(
            &self,
            _actor_id: &str,
            registration: WebhookRegistration,
        ) -> apify_client::Result<Webhook> {
            Ok(Webhook {
                id: "w1".into(),
                event_types: registration.event_types,
                request_url: registration.request_url,
            })
        }
    }

    #[derive(Default)]
    struct RecordingAlerts {
        alerts: Mutex<Vec<(String, String)>>,
    }

    impl AlertSink for RecordingAlerts {
        fn alert(&self, kind: &str, message: &str) {
            self.alerts
                .lock()
                .expect("alerts lock")
                .push((kind.to_string(), message.to_string()));
        }
    }

    struct Fixture {
        processor: WebhookProcessor,
        store: Arc<MemoryWebhookEventStore>,
        creators: Arc<MemoryCreatorStore>,
        alerts: Arc<RecordingAlerts>,
    }

    async fn fixture(items: Vec<Value>, fail_datasets: bool, seeded: Vec<UnifiedCreator>) -> Fixture {
        let store = Arc::new(MemoryWebhookEventStore::new());
        let creators = Arc::new(MemoryCreatorStore::new());
        for c in &seeded {
            creators.upsert(c).await.unwrap();
        }
        let api = Arc::new(StubApi {
            items,
            fail_datasets,
        });
        let pipeline = Arc::new(ResultPipeline::new(
            creators.clone(),
            PipelineConfig::default(),
        ));
        let tracker = Arc::new(RunTracker::new(api.clone(), Arc::new(LogObserver)));
        let alerts = Arc::new(RecordingAlerts::default());
        let processor = WebhookProcessor::new(
            store.clone(),
            api,
            pipeline,
            creators.clone(),
            tracker,
            alerts.clone(),
            HashMap::from([("a1".to_string(), Platform::Instagram)]),
        );
        Fixture {
            processor,
            store,
            creators,
            alerts,
        }
    }

    async fn success_event(store: &MemoryWebhookEventStore) -> WebhookEvent {
        let event = WebhookEvent::received(
            "apify",
            "ACTOR.RUN.SUCCEEDED",
            json!({
                "eventType": "ACTOR.RUN.SUCCEEDED",
                "eventData": {"actorId": "a1", "actorRunId": "r1"},
                "resource": {"id": "r1", "actId": "a1", "status": "SUCCEEDED", "defaultDatasetId": "d1"}
            }),
            None,
            3,
            Utc::now(),
        );
        store.insert(&event).await.unwrap();
        event
    }

    fn instagram_item(username: &str) -> Value {
        json!({
            "username": username,
            "fullName": format!("{username} full"),
            "followersCount": 1000,
            "postsCount": 10,
            "totalLikes": 500,
            "totalComments": 100
        })
    }

    fn seeded_creator(instagram: &str) -> UnifiedCreator {
        let mut c = UnifiedCreator::named("Existing", Utc::now());
        c.platform_identifiers = PlatformIdentifiers {
            instagram_username: Some(instagram.to_string()),
            ..Default::default()
        };
        c
    }

    #[tokio::test]
    async fn successful_run_ingests_dataset_with_dedup() {
        let fx = fixture(
            vec![instagram_item("alice"), instagram_item("bob")],
            false,
            vec![seeded_creator("alice")],
        )
        .await;
        let event = success_event(&fx.store).await;

        fx.processor.process_event(&event.id, Utc::now()).await.unwrap();

        let stored = fx.store.get(&event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WebhookEventStatus::Completed);
        assert!(stored.processed_at.is_some());

        // alice merged into the seeded record, bob created
        assert_eq!(fx.creators.len(), 2);
        assert_eq!(fx.creators.sync_state("r1").as_deref(), Some("synced"));
        assert_eq!(fx.store.dead_letter_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replaying_a_completed_event_is_idempotent() {
        let fx = fixture(vec![instagram_item("alice")], false, vec![]).await;
        let event = success_event(&fx.store).await;

        fx.processor.process_event(&event.id, Utc::now()).await.unwrap();
        assert_eq!(fx.creators.len(), 1);

        // Second delivery of the same event id changes nothing
        fx.processor.process_event(&event.id, Utc::now()).await.unwrap();
        assert_eq!(fx.creators.len(), 1);
        let stored = fx.store.get(&event.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn failed_run_updates_sync_state_and_alerts() {
        let fx = fixture(vec![], false, vec![]).await;
        let event = WebhookEvent::received(
            "apify",
            "ACTOR.RUN.FAILED",
            json!({
                "eventType": "ACTOR.RUN.FAILED",
                "eventData": {"actorId": "a1", "actorRunId": "r9"}
            }),
            None,
            3,
            Utc::now(),
        );
        fx.store.insert(&event).await.unwrap();

        fx.processor.process_event(&event.id, Utc::now()).await.unwrap();

        assert_eq!(fx.creators.sync_state("r9").as_deref(), Some("failed"));
        let alerts = fx.alerts.alerts.lock().expect("alerts lock");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, "run_failed");
    }

    #[tokio::test]
    async fn retry_schedule_doubles_then_dead_letters() {
        let fx = fixture(vec![], true, vec![]).await;
        let event = success_event(&fx.store).await;
        let now = Utc::now();

        // Attempt 1: fails, retry in 60s
        fx.processor.process_event(&event.id, now).await.unwrap();
        let stored = fx.store.get(&event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WebhookEventStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(
            stored.next_retry_at.unwrap(),
            now + chrono::Duration::seconds(60)
        );

        // Attempt 2: retry doubles to 120s
        fx.processor.process_event(&event.id, now).await.unwrap();
        let stored = fx.store.get(&event.id).await.unwrap().unwrap();
        assert_eq!(
            stored.next_retry_at.unwrap(),
            now + chrono::Duration::seconds(120)
        );

        // Attempt 3: exhausted
        fx.processor.process_event(&event.id, now).await.unwrap();
        let stored = fx.store.get(&event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WebhookEventStatus::DeadLetter);
        assert_eq!(stored.attempts, 3);
        assert_eq!(fx.store.dead_letter_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn attempts_never_exceed_max() {
        let fx = fixture(vec![], true, vec![]).await;
        let event = success_event(&fx.store).await;
        for _ in 0..10 {
            fx.processor.process_event(&event.id, Utc::now()).await.unwrap();
        }
        let stored = fx.store.get(&event.id).await.unwrap().unwrap();
        assert!(stored.attempts <= stored.max_attempts);
        assert_eq!(stored.status, WebhookEventStatus::DeadLetter);
    }

    #[tokio::test]
    async fn unknown_actor_without_platform_hint_retries() {
        let fx = fixture(vec![], false, vec![]).await;
        let event = WebhookEvent::received(
            "apify",
            "ACTOR.RUN.SUCCEEDED",
            json!({
                "eventType": "ACTOR.RUN.SUCCEEDED",
                "eventData": {"actorId": "unmapped", "actorRunId": "r1"}
            }),
            None,
            3,
            Utc::now(),
        );
        fx.store.insert(&event).await.unwrap();

        fx.processor.process_event(&event.id, Utc::now()).await.unwrap();
        let stored = fx.store.get(&event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WebhookEventStatus::Pending);
        assert!(stored.error.as_deref().unwrap_or("").contains("unmapped"));
    }
}
