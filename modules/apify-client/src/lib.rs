pub mod error;
pub mod types;

pub use error::{ApifyError, Result};
pub use types::{
    ActorRun, ApiResponse, DatasetPage, RunStats, RunStatus, StartOptions, Webhook,
    WebhookRegistration,
};

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

const BASE_URL: &str = "https://api.apify.com/v2";

/// Interval between run-status polls in `wait_for_finish`.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Page size used when draining a whole dataset.
const DATASET_PAGE_LIMIT: u64 = 1000;

/// The remote runner operations the orchestration plane needs. Kept narrow
/// so trackers and webhook handlers can be tested against a mock.
#[async_trait]
pub trait ActorApi: Send + Sync {
    /// Start an actor run. Returns immediately with run metadata.
    async fn start(
        &self,
        actor_id: &str,
        input: serde_json::Value,
        opts: StartOptions,
    ) -> Result<ActorRun>;

    /// Fetch current run metadata.
    async fn run(&self, run_id: &str) -> Result<ActorRun>;

    /// Poll until the run reaches a terminal status or the deadline passes.
    async fn wait_for_finish(&self, run_id: &str, max_secs: u64) -> Result<ActorRun>;

    /// Ask the runner to abort a run.
    async fn abort(&self, run_id: &str) -> Result<ActorRun>;

    /// Fetch one page of dataset items.
    async fn dataset_items(&self, dataset_id: &str, offset: u64, limit: u64)
        -> Result<DatasetPage>;

    /// Drain a whole dataset, paging until a short page.
    async fn all_dataset_items(&self, dataset_id: &str) -> Result<Vec<serde_json::Value>>;

    /// Fetch a single key-value store record.
    async fn store_record(&self, store_id: &str, key: &str) -> Result<serde_json::Value>;

    /// Register a webhook for an actor's run events.
    async fn register_webhook(
        &self,
        actor_id: &str,
        registration: WebhookRegistration,
    ) -> Result<Webhook>;
}

pub struct ApifyClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl ApifyClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, BASE_URL.to_string())
    }

    /// Point the client at a different API root (local stub in tests).
    pub fn with_base_url(token: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.client.get(url).bearer_auth(&self.token).send().await?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApifyError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl ActorApi for ApifyClient {
    async fn start(
        &self,
        actor_id: &str,
        input: serde_json::Value,
        opts: StartOptions,
    ) -> Result<ActorRun> {
        let mut url = format!("{}/acts/{}/runs", self.base_url, actor_id);
        let mut params = Vec::new();
        if let Some(memory) = opts.memory_mbytes {
            params.push(format!("memory={memory}"));
        }
        if let Some(timeout) = opts.timeout_secs {
            params.push(format!("timeout={timeout}"));
        }
        if let Some(build) = &opts.build {
            params.push(format!("build={build}"));
        }
        if !params.is_empty() {
            url = format!("{url}?{}", params.join("&"));
        }

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&input)
            .send()
            .await?;

        let api_resp: ApiResponse<ActorRun> = Self::decode(resp).await?;
        tracing::info!(
            run_id = %api_resp.data.id,
            actor_id,
            status = %api_resp.data.status,
            "Actor run started"
        );
        Ok(api_resp.data)
    }

    async fn run(&self, run_id: &str) -> Result<ActorRun> {
        let url = format!("{}/actor-runs/{}", self.base_url, run_id);
        let api_resp: ApiResponse<ActorRun> = self.get_json(&url).await?;
        Ok(api_resp.data)
    }

    async fn wait_for_finish(&self, run_id: &str, max_secs: u64) -> Result<ActorRun> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(max_secs);
        loop {
            let run = self.run(run_id).await?;
            if run.status.is_terminal() {
                return Ok(run);
            }
            tracing::debug!(run_id, status = %run.status, "Run still in progress");
            if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
                return Err(ApifyError::WaitDeadline {
                    run_id: run_id.to_string(),
                    max_secs,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn abort(&self, run_id: &str) -> Result<ActorRun> {
        let url = format!("{}/actor-runs/{}/abort", self.base_url, run_id);
        let resp = self.client.post(&url).bearer_auth(&self.token).send().await?;
        let api_resp: ApiResponse<ActorRun> = Self::decode(resp).await?;
        tracing::info!(run_id, status = %api_resp.data.status, "Abort requested");
        Ok(api_resp.data)
    }

    async fn dataset_items(
        &self,
        dataset_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<DatasetPage> {
        let url = format!(
            "{}/datasets/{}/items?format=json&offset={}&limit={}",
            self.base_url, dataset_id, offset, limit
        );
        let items: Vec<serde_json::Value> = self.get_json(&url).await?;
        Ok(DatasetPage {
            items,
            offset,
            limit,
        })
    }

    async fn all_dataset_items(&self, dataset_id: &str) -> Result<Vec<serde_json::Value>> {
        let mut all = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = self
                .dataset_items(dataset_id, offset, DATASET_PAGE_LIMIT)
                .await?;
            let last = page.is_last();
            offset += page.items.len() as u64;
            all.extend(page.items);
            if last {
                break;
            }
        }
        tracing::debug!(dataset_id, count = all.len(), "Drained dataset");
        Ok(all)
    }

    async fn store_record(&self, store_id: &str, key: &str) -> Result<serde_json::Value> {
        let url = format!(
            "{}/key-value-stores/{}/records/{}",
            self.base_url, store_id, key
        );
        self.get_json(&url).await
    }

    async fn register_webhook(
        &self,
        actor_id: &str,
        registration: WebhookRegistration,
    ) -> Result<Webhook> {
        let url = format!("{}/webhooks", self.base_url);
        let body = serde_json::json!({
            "eventTypes": registration.event_types,
            "condition": { "actorId": actor_id },
            "requestUrl": registration.request_url,
            "payloadTemplate": registration.payload_template,
        });
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let api_resp: ApiResponse<Webhook> = Self::decode(resp).await?;
        tracing::info!(
            webhook_id = %api_resp.data.id,
            actor_id,
            "Webhook registered"
        );
        Ok(api_resp.data)
    }
}
