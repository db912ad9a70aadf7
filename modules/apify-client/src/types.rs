use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an actor run. Terminal statuses never change once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Ready,
    Running,
    Succeeded,
    Failed,
    #[serde(rename = "TIMED-OUT", alias = "TIMED_OUT")]
    TimedOut,
    Aborted,
    Aborting,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::TimedOut | RunStatus::Aborted
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Ready => "READY",
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::TimedOut => "TIMED-OUT",
            RunStatus::Aborted => "ABORTED",
            RunStatus::Aborting => "ABORTING",
        };
        write!(f, "{s}")
    }
}

/// Resource usage reported alongside a run.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunStats {
    #[serde(rename = "computeUnits")]
    pub compute_units: Option<f64>,
    #[serde(rename = "durationMillis")]
    pub duration_millis: Option<u64>,
    #[serde(rename = "memAvgBytes")]
    pub mem_avg_bytes: Option<f64>,
    #[serde(rename = "resultCount")]
    pub result_count: Option<u64>,
}

/// Actor run metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActorRun {
    pub id: String,
    #[serde(rename = "actId")]
    pub actor_id: String,
    pub status: RunStatus,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: Option<String>,
    #[serde(rename = "defaultKeyValueStoreId")]
    pub default_key_value_store_id: Option<String>,
    #[serde(rename = "exitCode")]
    pub exit_code: Option<i32>,
    pub stats: Option<RunStats>,
}

/// One page of dataset items.
#[derive(Debug, Clone)]
pub struct DatasetPage {
    pub items: Vec<serde_json::Value>,
    pub offset: u64,
    pub limit: u64,
}

impl DatasetPage {
    /// A short page means the dataset is exhausted.
    pub fn is_last(&self) -> bool {
        (self.items.len() as u64) < self.limit
    }
}

/// Options accepted when starting a run.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub memory_mbytes: Option<u32>,
    pub timeout_secs: Option<u32>,
    pub build: Option<String>,
}

/// Request body for registering a webhook against an actor.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookRegistration {
    #[serde(rename = "eventTypes")]
    pub event_types: Vec<String>,
    #[serde(rename = "requestUrl")]
    pub request_url: String,
    #[serde(rename = "payloadTemplate", skip_serializing_if = "Option::is_none")]
    pub payload_template: Option<String>,
}

/// A registered webhook as returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct Webhook {
    pub id: String,
    #[serde(rename = "eventTypes")]
    pub event_types: Vec<String>,
    #[serde(rename = "requestUrl")]
    pub request_url: String,
}

/// Wrapper for API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::TimedOut.is_terminal());
        assert!(RunStatus::Aborted.is_terminal());
        assert!(!RunStatus::Ready.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Aborting.is_terminal());
    }

    #[test]
    fn run_deserializes_api_shape() {
        let json = r#"{
            "id": "r1",
            "actId": "a1",
            "status": "TIMED-OUT",
            "startedAt": "2026-01-01T00:00:00Z",
            "finishedAt": null,
            "defaultDatasetId": "d1",
            "defaultKeyValueStoreId": "kv1",
            "exitCode": 137,
            "stats": {"computeUnits": 0.25}
        }"#;
        let run: ActorRun = serde_json::from_str(json).unwrap();
        assert_eq!(run.status, RunStatus::TimedOut);
        assert_eq!(run.default_dataset_id.as_deref(), Some("d1"));
        assert_eq!(run.stats.unwrap().compute_units, Some(0.25));
    }

    #[test]
    fn short_page_is_last() {
        let page = DatasetPage {
            items: vec![serde_json::json!({})],
            offset: 0,
            limit: 1000,
        };
        assert!(page.is_last());

        let full = DatasetPage {
            items: vec![serde_json::json!({}); 2],
            offset: 0,
            limit: 2,
        };
        assert!(!full.is_last());
    }
}
