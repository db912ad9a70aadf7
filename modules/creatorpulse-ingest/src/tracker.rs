//! Run tracking: one poller per tracked run, reconciled against webhook
//! deliveries. Terminal statuses are absorbing; duplicate or out-of-order
//! deliveries can never regress a run to RUNNING.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apify_client::{ActorApi, RunStatus};
use creatorpulse_common::Platform;
use tracing::{info, warn};

/// Default interval between polls of the remote runner.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// A status/progress sample published to the monitoring sink.
#[derive(Debug, Clone)]
pub struct RunUpdate {
    pub run_id: String,
    pub platform: Platform,
    pub status: RunStatus,
    pub items_processed: Option<u64>,
    pub compute_units: Option<f64>,
    pub finished: bool,
}

/// Consumer of run progress (monitoring, billing).
pub trait RunObserver: Send + Sync {
    fn on_update(&self, update: &RunUpdate);
}

/// Observer that just logs.
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn on_update(&self, update: &RunUpdate) {
        info!(
            run_id = %update.run_id,
            platform = %update.platform,
            status = %update.status,
            items = update.items_processed,
            "Run update"
        );
    }
}

#[derive(Debug)]
struct TrackedRun {
    platform: Platform,
    status: RunStatus,
    cancelled: Arc<AtomicBool>,
}

pub struct RunTracker {
    api: Arc<dyn ActorApi>,
    observer: Arc<dyn RunObserver>,
    poll_interval: Duration,
    runs: Mutex<HashMap<String, TrackedRun>>,
}

impl RunTracker {
    pub fn new(api: Arc<dyn ActorApi>, observer: Arc<dyn RunObserver>) -> Self {
        Self::with_poll_interval(api, observer, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        api: Arc<dyn ActorApi>,
        observer: Arc<dyn RunObserver>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            api,
            observer,
            poll_interval,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Terminal states absorb; everything else advances to the incoming
    /// status.
    fn advance(current: RunStatus, incoming: RunStatus) -> RunStatus {
        if current.is_terminal() {
            current
        } else {
            incoming
        }
    }

    pub fn status(&self, run_id: &str) -> Option<RunStatus> {
        self.runs
            .lock()
            .expect("tracker lock poisoned")
            .get(run_id)
            .map(|r| r.status)
    }

    /// Apply a status observed via webhook or poll. Returns the status now
    /// on record.
    pub fn reconcile(&self, run_id: &str, platform: Platform, incoming: RunStatus) -> RunStatus {
        let mut runs = self.runs.lock().expect("tracker lock poisoned");
        let entry = runs.entry(run_id.to_string()).or_insert_with(|| TrackedRun {
            platform,
            status: RunStatus::Running,
            cancelled: Arc::new(AtomicBool::new(false)),
        });

        let next = Self::advance(entry.status, incoming);
        if next != entry.status {
            info!(run_id, from = %entry.status, to = %next, "Run status advanced");
            entry.status = next;
        } else if entry.status.is_terminal() && incoming != entry.status {
            warn!(
                run_id,
                current = %entry.status,
                ignored = %incoming,
                "Ignored status update for terminal run"
            );
        }
        entry.status
    }

    /// Stop the poller for a run.
    pub fn cancel(&self, run_id: &str) {
        let runs = self.runs.lock().expect("tracker lock poisoned");
        if let Some(run) = runs.get(run_id) {
            run.cancelled.store(true, Ordering::Relaxed);
        }
    }

    /// Begin following a run: registers it and spawns a poller that
    /// publishes progress until the run settles or is cancelled.
    pub fn track(self: &Arc<Self>, run_id: &str, platform: Platform) -> tokio::task::JoinHandle<()> {
        let cancelled = {
            let mut runs = self.runs.lock().expect("tracker lock poisoned");
            let entry = runs.entry(run_id.to_string()).or_insert_with(|| TrackedRun {
                platform,
                status: RunStatus::Running,
                cancelled: Arc::new(AtomicBool::new(false)),
            });
            Arc::clone(&entry.cancelled)
        };

        let tracker = Arc::clone(self);
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            loop {
                if cancelled.load(Ordering::Relaxed) {
                    info!(run_id = %run_id, "Run tracking cancelled");
                    return;
                }

                match tracker.api.run(&run_id).await {
                    Ok(run) => {
                        let status = tracker.reconcile(&run_id, platform, run.status);
                        let update = RunUpdate {
                            run_id: run_id.clone(),
                            platform,
                            status,
                            items_processed: run.stats.as_ref().and_then(|s| s.result_count),
                            compute_units: run.stats.as_ref().and_then(|s| s.compute_units),
                            finished: status.is_terminal(),
                        };
                        tracker.observer.on_update(&update);
                        if status.is_terminal() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(run_id = %run_id, error = %err, "Run poll failed");
                    }
                }

                tokio::time::sleep(tracker.poll_interval).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apify_client::{
        ActorRun, ApifyError, DatasetPage, RunStats, StartOptions, Webhook, WebhookRegistration,
    };
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Scripted remote runner: returns the queued statuses in order,
    /// repeating the last one.
    struct ScriptedApi {
        statuses: Vec<RunStatus>,
        calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(statuses: Vec<RunStatus>) -> Self {
            Self {
                statuses,
                calls: AtomicUsize::new(0),
            }
        }

        fn run_with(&self, status: RunStatus) -> ActorRun {
            ActorRun {
                id: "r1".into(),
                actor_id: "a1".into(),
                status,
                started_at: None,
                finished_at: None,
                default_dataset_id: Some("d1".into()),
                default_key_value_store_id: None,
                exit_code: None,
                stats: Some(RunStats {
                    compute_units: Some(0.1),
                    duration_millis: None,
                    mem_avg_bytes: None,
                    result_count: Some(5),
                }),
            }
        }
    }

    #[async_trait]
    impl ActorApi for ScriptedApi {
        async fn start(
            &self,
            _actor_id: &str,
            _input: serde_json::Value,
            _opts: StartOptions,
        ) -> apify_client::Result<ActorRun> {
            Err(ApifyError::Network("not scripted".into()))
        }

        async fn run(&self, _run_id: &str) -> apify_client::Result<ActorRun> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let status = self
                .statuses
                .get(n)
                .or(self.statuses.last())
                .copied()
                .unwrap_or(RunStatus::Running);
            Ok(self.run_with(status))
        }

        async fn wait_for_finish(
            &self,
            run_id: &str,
            _max_secs: u64,
        ) -> apify_client::Result<ActorRun> {
            self.run(run_id).await
        }

        async fn abort(&self, run_id: &str) -> apify_client::Result<ActorRun> {
            let _ = run_id;
            Ok(self.run_with(RunStatus::Aborted))
        }

        async fn dataset_items(
            &self,
            _dataset_id: &str,
            offset: u64,
            limit: u64,
        ) -> apify_client::Result<DatasetPage> {
            Ok(DatasetPage {
                items: vec![],
                offset,
                limit,
            })
        }

        async fn all_dataset_items(
            &self,
            _dataset_id: &str,
        ) -> apify_client::Result<Vec<serde_json::Value>> {
            Ok(vec![])
        }

        async fn store_record(
            &self,
            _store_id: &str,
            _key: &str,
        ) -> apify_client::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
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
    struct RecordingObserver {
        updates: Mutex<Vec<RunUpdate>>,
    }

    impl RunObserver for RecordingObserver {
        fn on_update(&self, update: &RunUpdate) {
            self.updates
                .lock()
                .expect("observer lock")
                .push(update.clone());
        }
    }

    fn tracker_with(
        statuses: Vec<RunStatus>,
        observer: Arc<RecordingObserver>,
    ) -> Arc<RunTracker> {
        Arc::new(RunTracker::with_poll_interval(
            Arc::new(ScriptedApi::new(statuses)),
            observer,
            Duration::from_millis(10),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn poller_follows_run_to_terminal() {
        let observer = Arc::new(RecordingObserver::default());
        let tracker = tracker_with(
            vec![RunStatus::Running, RunStatus::Running, RunStatus::Succeeded],
            Arc::clone(&observer),
        );

        tracker.track("r1", Platform::TikTok).await.unwrap();

        let updates = observer.updates.lock().expect("observer lock");
        assert_eq!(updates.len(), 3);
        assert!(updates.last().unwrap().finished);
        assert_eq!(updates.last().unwrap().status, RunStatus::Succeeded);
        assert_eq!(tracker.status("r1"), Some(RunStatus::Succeeded));
    }

    #[tokio::test]
    async fn terminal_status_is_never_regressed() {
        let observer = Arc::new(RecordingObserver::default());
        let tracker = tracker_with(vec![], observer);

        tracker.reconcile("r1", Platform::Instagram, RunStatus::Succeeded);
        let after = tracker.reconcile("r1", Platform::Instagram, RunStatus::Running);
        assert_eq!(after, RunStatus::Succeeded);

        // A different terminal status does not replace the first one
        let after = tracker.reconcile("r1", Platform::Instagram, RunStatus::Failed);
        assert_eq!(after, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn duplicate_terminal_delivery_is_noop() {
        let observer = Arc::new(RecordingObserver::default());
        let tracker = tracker_with(vec![], observer);

        let first = tracker.reconcile("r1", Platform::YouTube, RunStatus::Failed);
        let second = tracker.reconcile("r1", Platform::YouTube, RunStatus::Failed);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn out_of_order_terminal_before_running_holds() {
        let observer = Arc::new(RecordingObserver::default());
        let tracker = tracker_with(vec![], observer);

        // Webhook lands before the first poll result
        tracker.reconcile("r1", Platform::Twitter, RunStatus::TimedOut);
        let status = tracker.reconcile("r1", Platform::Twitter, RunStatus::Running);
        assert_eq!(status, RunStatus::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_the_poller() {
        let observer = Arc::new(RecordingObserver::default());
        let tracker = tracker_with(vec![RunStatus::Running], Arc::clone(&observer));

        let handle = tracker.track("r1", Platform::LinkedIn);
        // Let at least one poll happen, then cancel
        tokio::time::sleep(Duration::from_millis(25)).await;
        tracker.cancel("r1");
        handle.await.unwrap();

        assert_eq!(tracker.status("r1"), Some(RunStatus::Running));
    }
}
