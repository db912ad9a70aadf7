//! Webhook events: the persisted unit of work between ingress and handler.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use apify_client::{ActorRun, RunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLetter,
}

impl WebhookEventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WebhookEventStatus::Completed | WebhookEventStatus::DeadLetter
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventStatus::Pending => "pending",
            WebhookEventStatus::Processing => "processing",
            WebhookEventStatus::Completed => "completed",
            WebhookEventStatus::Failed => "failed",
            WebhookEventStatus::DeadLetter => "dead_letter",
        }
    }
}

impl std::str::FromStr for WebhookEventStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "dead_letter" => Ok(Self::DeadLetter),
            other => Err(format!("unknown webhook event status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub id: String,
    pub provider: String,
    pub event_type: String,
    pub payload: Value,
    pub signature: Option<String>,
    pub status: WebhookEventStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl WebhookEvent {
    pub fn received(
        provider: &str,
        event_type: &str,
        payload: Value,
        signature: Option<String>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            event_type: event_type.to_string(),
            payload,
            signature,
            status: WebhookEventStatus::Pending,
            attempts: 0,
            max_attempts,
            next_retry_at: None,
            created_at: now,
            processed_at: None,
            error: None,
        }
    }
}

/// The delivery body the actor service posts. Only the fields the handler
/// dispatches on are typed; the full payload stays on the event record.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "eventData")]
    pub event_data: WebhookEventData,
    /// The run as of delivery time.
    pub resource: Option<ActorRun>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    #[serde(rename = "actorId")]
    pub actor_id: String,
    #[serde(rename = "actorRunId")]
    pub actor_run_id: String,
}

impl WebhookPayload {
    /// Terminal run status implied by the event type, if any.
    pub fn terminal_status(&self) -> Option<RunStatus> {
        match self.event_type.as_str() {
            "ACTOR.RUN.SUCCEEDED" => Some(RunStatus::Succeeded),
            "ACTOR.RUN.FAILED" => Some(RunStatus::Failed),
            "ACTOR.RUN.ABORTED" => Some(RunStatus::Aborted),
            "ACTOR.RUN.TIMED_OUT" => Some(RunStatus::TimedOut),
            _ => None,
        }
    }
}

/// Durable store for webhook events. Only the owning worker mutates a
/// given event.
#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    async fn insert(&self, event: &WebhookEvent) -> anyhow::Result<()>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<WebhookEvent>>;
    async fn update(&self, event: &WebhookEvent) -> anyhow::Result<()>;
    /// Pending events whose retry time has come, oldest first.
    async fn due_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<WebhookEvent>>;
    async fn dead_letter_count(&self) -> anyhow::Result<u64>;
    /// Dead-lettered events, oldest first.
    async fn dead_letters(&self, limit: usize) -> anyhow::Result<Vec<WebhookEvent>>;
}

/// In-memory store for tests and single-process runs.
#[derive(Default)]
pub struct MemoryWebhookEventStore {
    events: Mutex<HashMap<String, WebhookEvent>>,
}

impl MemoryWebhookEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookEventStore for MemoryWebhookEventStore {
    async fn insert(&self, event: &WebhookEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .expect("event store lock poisoned")
            .insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<WebhookEvent>> {
        Ok(self
            .events
            .lock()
            .expect("event store lock poisoned")
            .get(id)
            .cloned())
    }

    async fn update(&self, event: &WebhookEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .expect("event store lock poisoned")
            .insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn due_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<WebhookEvent>> {
        let events = self.events.lock().expect("event store lock poisoned");
        let mut due: Vec<WebhookEvent> = events
            .values()
            .filter(|e| {
                e.status == WebhookEventStatus::Pending
                    && e.next_retry_at.map(|t| t <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|e| e.created_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn dead_letter_count(&self) -> anyhow::Result<u64> {
        Ok(self
            .events
            .lock()
            .expect("event store lock poisoned")
            .values()
            .filter(|e| e.status == WebhookEventStatus::DeadLetter)
            .count() as u64)
    }

    async fn dead_letters(&self, limit: usize) -> anyhow::Result<Vec<WebhookEvent>> {
        let events = self.events.lock().expect("event store lock poisoned");
        let mut dead: Vec<WebhookEvent> = events
            .values()
            .filter(|e| e.status == WebhookEventStatus::DeadLetter)
            .cloned()
            .collect();
        dead.sort_by_key(|e| e.created_at);
        dead.truncate(limit);
        Ok(dead)
    }
}
