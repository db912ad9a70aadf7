//! Worker pool draining one queue. Each worker claims a semaphore permit,
//! runs the handler on its own task, and reports the outcome back to the
//! queue, which owns the retry decision.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::job::Job;
use crate::queue::JobQueue;

/// How long the pool sleeps when the queue has nothing runnable.
const IDLE_POLL: Duration = Duration::from_millis(100);

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn process(&self, job: &Job) -> anyhow::Result<serde_json::Value>;
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    semaphore: Arc<Semaphore>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(queue: Arc<JobQueue>, handler: Arc<dyn JobHandler>) -> Self {
        let concurrency = queue.config().concurrency;
        Self {
            queue,
            handler,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle used to stop the drain loop from elsewhere.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the drain loop.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Drain until shutdown. Permits bound in-flight work; the loop blocks
    /// on a permit before claiming a job so a full pool never over-claims.
    pub async fn run(&self) {
        info!(
            queue = %self.queue.name(),
            concurrency = self.queue.config().concurrency,
            "Worker pool started"
        );
        while !self.shutdown.load(Ordering::Relaxed) {
            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            let Some(job) = self.queue.next_job(Utc::now()) else {
                drop(permit);
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            };

            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                let job_id = job.id.clone();
                match handler.process(&job).await {
                    Ok(_) => {
                        queue.complete(&job_id, Utc::now());
                    }
                    Err(err) => {
                        error!(
                            queue = %queue.name(),
                            job_id = %job_id,
                            error = %err,
                            "Job handler failed"
                        );
                        queue.fail(&job_id, &err.to_string(), Utc::now());
                    }
                }
                drop(permit);
            });
        }
        info!(queue = %self.queue.name(), "Worker pool stopped");
    }
}
