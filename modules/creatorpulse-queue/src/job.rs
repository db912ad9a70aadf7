use chrono::{DateTime, Utc};
use creatorpulse_common::Platform;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
    /// Poison job parked in the dead-letter set.
    Dead,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Delayed => "delayed",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

/// Payload carried by a scrape job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobData {
    /// Absent for control jobs (webhook processing) that are not tied to a
    /// platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    pub actor_id: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Caller-tunable knobs at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Higher runs first. Equal priorities run in enqueue order.
    pub priority: i32,
    /// The job stays `delayed` until this instant.
    pub delay_until: Option<DateTime<Utc>>,
    /// Overrides the queue's default max attempts.
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub name: String,
    pub priority: i32,
    pub data: JobData,
    pub attempts_made: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    /// Enqueue sequence, the FIFO tiebreaker within a priority class.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Job {
    /// True once the job will never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Dead
        )
    }
}
