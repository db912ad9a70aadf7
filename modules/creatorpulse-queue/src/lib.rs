pub mod health;
pub mod job;
pub mod queue;
pub mod worker;

pub use health::{assess_health, QueueHealth, QueueStats};
pub use job::{Job, JobData, JobOptions, JobStatus};
pub use queue::{
    FailOutcome, JobQueue, QueueConfig, QueueCounts, QueueManager, CREATOR_SYNC, DISCOVERY,
    SCRAPING, WEBHOOK_PROCESSING,
};
pub use worker::{JobHandler, WorkerPool};
