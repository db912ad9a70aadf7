//! Named job queues: priority scheduling with FIFO inside a priority class,
//! delayed jobs, retry-with-backoff, retention budgets, and a dead-letter
//! set for poison jobs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::health::QueueStats;
use crate::job::{Job, JobData, JobOptions, JobStatus};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Worker-pool size; admission to a worker blocks on this many permits.
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_multiplier: f64,
    /// Terminal jobs kept for inspection before pruning.
    pub remove_on_complete: usize,
    pub remove_on_fail: usize,
    /// Exhausted jobs go to the dead-letter set instead of plain `failed`.
    pub dead_letter: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_retries: 3,
            backoff_initial_ms: 5000,
            backoff_multiplier: 2.0,
            remove_on_complete: 100,
            remove_on_fail: 1000,
            dead_letter: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead: usize,
}

/// What happened to a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Re-enqueued as delayed; runnable at the contained instant.
    Retried { next_attempt_at: DateTime<Utc> },
    Failed,
    DeadLettered,
}

#[derive(Debug, Default)]
struct QueueState {
    waiting: Vec<Job>,
    delayed: Vec<Job>,
    active: HashMap<String, Job>,
    completed: VecDeque<Job>,
    failed: VecDeque<Job>,
    dead: Vec<Job>,
    paused: bool,
    next_seq: u64,
    completed_total: u64,
    failed_total: u64,
    processing_ms_total: u64,
}

pub struct JobQueue {
    name: String,
    config: QueueConfig,
    state: Mutex<QueueState>,
}

impl JobQueue {
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn enqueue(&self, name: impl Into<String>, data: JobData, opts: JobOptions) -> Job {
        let now = Utc::now();
        let mut state = self.state.lock().expect("queue lock poisoned");
        let seq = state.next_seq;
        state.next_seq += 1;

        let delayed = opts.delay_until.map(|t| t > now).unwrap_or(false);
        let job = Job {
            id: Uuid::new_v4().to_string(),
            queue: self.name.clone(),
            name: name.into(),
            priority: opts.priority,
            data,
            attempts_made: 0,
            max_attempts: opts.max_attempts.unwrap_or(self.config.max_retries),
            delay_until: opts.delay_until,
            status: if delayed {
                JobStatus::Delayed
            } else {
                JobStatus::Waiting
            },
            created_at: now,
            processed_on: None,
            finished_on: None,
            failed_reason: None,
            seq,
        };

        if delayed {
            state.delayed.push(job.clone());
        } else {
            state.waiting.push(job.clone());
        }
        job
    }

    /// Move delayed jobs whose time has come into the waiting set.
    fn promote_due(state: &mut QueueState, now: DateTime<Utc>) {
        let mut still_delayed = Vec::new();
        for mut job in state.delayed.drain(..) {
            if job.delay_until.map(|t| t <= now).unwrap_or(true) {
                job.status = JobStatus::Waiting;
                job.delay_until = None;
                state.waiting.push(job);
            } else {
                still_delayed.push(job);
            }
        }
        state.delayed = still_delayed;
    }

    /// Claim the next runnable job: highest priority first, oldest first
    /// within a class. Returns nothing while paused.
    pub fn next_job(&self, now: DateTime<Utc>) -> Option<Job> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        if state.paused {
            return None;
        }
        Self::promote_due(&mut state, now);

        let best = state
            .waiting
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(i, _)| i)?;

        let mut job = state.waiting.swap_remove(best);
        job.status = JobStatus::Active;
        job.attempts_made += 1;
        job.processed_on = Some(now);
        state.active.insert(job.id.clone(), job.clone());
        Some(job)
    }

    pub fn complete(&self, job_id: &str, now: DateTime<Utc>) -> Option<Job> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        let mut job = state.active.remove(job_id)?;
        job.status = JobStatus::Completed;
        job.finished_on = Some(now);
        if let Some(started) = job.processed_on {
            state.processing_ms_total += (now - started).num_milliseconds().max(0) as u64;
        }
        state.completed_total += 1;
        state.completed.push_back(job.clone());
        let budget = self.config.remove_on_complete;
        while state.completed.len() > budget {
            state.completed.pop_front();
        }
        Some(job)
    }

    /// Record a failure: re-enqueue with exponential backoff while attempts
    /// remain, otherwise fail or dead-letter.
    pub fn fail(&self, job_id: &str, reason: &str, now: DateTime<Utc>) -> Option<FailOutcome> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        let mut job = state.active.remove(job_id)?;
        job.failed_reason = Some(reason.to_string());
        if let Some(started) = job.processed_on {
            state.processing_ms_total += (now - started).num_milliseconds().max(0) as u64;
        }

        if job.attempts_made < job.max_attempts {
            let delay_ms = (self.config.backoff_initial_ms as f64
                * self
                    .config
                    .backoff_multiplier
                    .powi(job.attempts_made as i32)) as i64;
            let next_attempt_at = now + chrono::Duration::milliseconds(delay_ms);
            job.status = JobStatus::Delayed;
            job.delay_until = Some(next_attempt_at);
            info!(
                queue = %self.name,
                job_id,
                attempt = job.attempts_made,
                delay_ms,
                "Job failed, retrying with backoff"
            );
            state.delayed.push(job);
            return Some(FailOutcome::Retried { next_attempt_at });
        }

        job.finished_on = Some(now);
        state.failed_total += 1;
        if self.config.dead_letter {
            job.status = JobStatus::Dead;
            warn!(queue = %self.name, job_id, reason, "Job exhausted retries, dead-lettered");
            state.dead.push(job);
            Some(FailOutcome::DeadLettered)
        } else {
            job.status = JobStatus::Failed;
            warn!(queue = %self.name, job_id, reason, "Job exhausted retries, failed");
            state.failed.push_back(job);
            let budget = self.config.remove_on_fail;
            while state.failed.len() > budget {
                state.failed.pop_front();
            }
            Some(FailOutcome::Failed)
        }
    }

    /// Remove a job that has not started. Active jobs cannot be cancelled
    /// remotely.
    pub fn cancel(&self, job_id: &str) -> bool {
        let mut state = self.state.lock().expect("queue lock poisoned");
        let waiting_before = state.waiting.len();
        state.waiting.retain(|j| j.id != job_id);
        if state.waiting.len() < waiting_before {
            return true;
        }
        let delayed_before = state.delayed.len();
        state.delayed.retain(|j| j.id != job_id);
        state.delayed.len() < delayed_before
    }

    /// Stop handing out jobs. In-flight work finishes normally.
    pub fn pause(&self) {
        self.state.lock().expect("queue lock poisoned").paused = true;
        info!(queue = %self.name, "Queue paused");
    }

    pub fn resume(&self) {
        self.state.lock().expect("queue lock poisoned").paused = false;
        info!(queue = %self.name, "Queue resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().expect("queue lock poisoned").paused
    }

    /// Drop all terminal job records.
    pub fn clean(&self) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.completed.clear();
        state.failed.clear();
        state.dead.clear();
        info!(queue = %self.name, "Queue cleaned");
    }

    pub fn counts(&self) -> QueueCounts {
        let state = self.state.lock().expect("queue lock poisoned");
        QueueCounts {
            waiting: state.waiting.len(),
            delayed: state.delayed.len(),
            active: state.active.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
            dead: state.dead.len(),
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock().expect("queue lock poisoned");
        let finished = state.completed_total + state.failed_total;
        QueueStats {
            completed: state.completed_total,
            failed: state.failed_total,
            active: state.active.len(),
            waiting: state.waiting.len() + state.delayed.len(),
            avg_processing_ms: if finished == 0 {
                0.0
            } else {
                state.processing_ms_total as f64 / finished as f64
            },
        }
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        let state = self.state.lock().expect("queue lock poisoned");
        state
            .waiting
            .iter()
            .chain(state.delayed.iter())
            .chain(state.active.values())
            .chain(state.completed.iter())
            .chain(state.failed.iter())
            .chain(state.dead.iter())
            .find(|j| j.id == job_id)
            .cloned()
    }
}

/// Registry of the named queues the plane runs on.
pub struct QueueManager {
    queues: HashMap<String, Arc<JobQueue>>,
}

/// Standard queue names.
pub const SCRAPING: &str = "scraping";
pub const DISCOVERY: &str = "discovery";
pub const CREATOR_SYNC: &str = "creator-sync";
pub const WEBHOOK_PROCESSING: &str = "webhook-processing";

impl QueueManager {
    /// Build the standard queue set, sharing base tuning.
    pub fn standard(base: QueueConfig) -> Self {
        let mut queues = HashMap::new();
        for name in [SCRAPING, DISCOVERY, CREATOR_SYNC] {
            queues.insert(
                name.to_string(),
                Arc::new(JobQueue::new(name, base.clone())),
            );
        }
        // Webhook processing dead-letters poison events instead of dropping them
        queues.insert(
            WEBHOOK_PROCESSING.to_string(),
            Arc::new(JobQueue::new(
                WEBHOOK_PROCESSING,
                QueueConfig {
                    dead_letter: true,
                    ..base
                },
            )),
        );
        Self { queues }
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobQueue>> {
        self.queues.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<JobQueue>)> {
        self.queues.iter()
    }
}

impl std::fmt::Display for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Queues ===")?;
        for name in self.names() {
            if let Some(queue) = self.queues.get(&name) {
                let c = queue.counts();
                writeln!(
                    f,
                    "{name:<20} waiting={} delayed={} active={} completed={} failed={} dead={}{}",
                    c.waiting,
                    c.delayed,
                    c.active,
                    c.completed,
                    c.failed,
                    c.dead,
                    if queue.is_paused() { " [PAUSED]" } else { "" },
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use creatorpulse_common::Platform;
    use serde_json::json;

    fn data() -> JobData {
        JobData {
            platform: Some(Platform::TikTok),
            actor_id: "actor-1".into(),
            input: json!({"username": "alice"}),
            user_id: None,
            metadata: None,
        }
    }

    fn queue() -> JobQueue {
        JobQueue::new("scraping", QueueConfig::default())
    }

    #[test]
    fn higher_priority_runs_first() {
        let q = queue();
        q.enqueue("low", data(), JobOptions::default());
        q.enqueue(
            "high",
            data(),
            JobOptions {
                priority: 10,
                ..Default::default()
            },
        );
        let job = q.next_job(Utc::now()).unwrap();
        assert_eq!(job.name, "high");
    }

    #[test]
    fn equal_priority_is_fifo() {
        let q = queue();
        q.enqueue("first", data(), JobOptions::default());
        q.enqueue("second", data(), JobOptions::default());
        assert_eq!(q.next_job(Utc::now()).unwrap().name, "first");
        assert_eq!(q.next_job(Utc::now()).unwrap().name, "second");
    }

    #[test]
    fn delayed_job_waits_for_its_time() {
        let q = queue();
        let now = Utc::now();
        q.enqueue(
            "later",
            data(),
            JobOptions {
                delay_until: Some(now + chrono::Duration::seconds(60)),
                ..Default::default()
            },
        );
        assert!(q.next_job(now).is_none());
        let job = q.next_job(now + chrono::Duration::seconds(61)).unwrap();
        assert_eq!(job.name, "later");
    }

    #[test]
    fn failure_reenqueues_with_backoff_until_exhausted() {
        let q = JobQueue::new(
            "scraping",
            QueueConfig {
                max_retries: 3,
                backoff_initial_ms: 1000,
                backoff_multiplier: 2.0,
                ..Default::default()
            },
        );
        q.enqueue("j", data(), JobOptions::default());
        let now = Utc::now();

        // Attempt 1 fails: delay 1000 * 2^1
        let job = q.next_job(now).unwrap();
        assert_eq!(job.attempts_made, 1);
        let outcome = q.fail(&job.id, "boom", now).unwrap();
        match outcome {
            FailOutcome::Retried { next_attempt_at } => {
                assert_eq!((next_attempt_at - now).num_milliseconds(), 2000);
            }
            other => panic!("expected retry, got {other:?}"),
        }

        // Attempt 2 fails: delay 1000 * 2^2
        let t2 = now + chrono::Duration::seconds(3);
        let job = q.next_job(t2).unwrap();
        assert_eq!(job.attempts_made, 2);
        match q.fail(&job.id, "boom", t2).unwrap() {
            FailOutcome::Retried { next_attempt_at } => {
                assert_eq!((next_attempt_at - t2).num_milliseconds(), 4000);
            }
            other => panic!("expected retry, got {other:?}"),
        }

        // Attempt 3 fails: exhausted
        let t3 = t2 + chrono::Duration::seconds(10);
        let job = q.next_job(t3).unwrap();
        assert_eq!(job.attempts_made, 3);
        assert_eq!(q.fail(&job.id, "boom", t3).unwrap(), FailOutcome::Failed);
        assert_eq!(q.counts().failed, 1);
    }

    #[test]
    fn dead_letter_queue_receives_exhausted_jobs() {
        let q = JobQueue::new(
            "webhook-processing",
            QueueConfig {
                max_retries: 1,
                dead_letter: true,
                ..Default::default()
            },
        );
        q.enqueue("poison", data(), JobOptions::default());
        let now = Utc::now();
        let job = q.next_job(now).unwrap();
        assert_eq!(
            q.fail(&job.id, "always fails", now).unwrap(),
            FailOutcome::DeadLettered
        );
        assert_eq!(q.counts().dead, 1);
        assert_eq!(q.counts().failed, 0);
    }

    #[test]
    fn pause_blocks_acquisition_resume_restores() {
        let q = queue();
        q.enqueue("j", data(), JobOptions::default());
        q.pause();
        assert!(q.next_job(Utc::now()).is_none());
        q.resume();
        assert!(q.next_job(Utc::now()).is_some());
    }

    #[test]
    fn cancel_removes_waiting_but_not_active() {
        let q = queue();
        let job = q.enqueue("j", data(), JobOptions::default());
        assert!(q.cancel(&job.id));
        assert!(q.next_job(Utc::now()).is_none());

        let job = q.enqueue("j2", data(), JobOptions::default());
        let active = q.next_job(Utc::now()).unwrap();
        assert_eq!(active.id, job.id);
        assert!(!q.cancel(&job.id));
    }

    #[test]
    fn retention_budget_prunes_completed() {
        let q = JobQueue::new(
            "scraping",
            QueueConfig {
                remove_on_complete: 2,
                ..Default::default()
            },
        );
        let now = Utc::now();
        for i in 0..5 {
            q.enqueue(format!("j{i}"), data(), JobOptions::default());
            let job = q.next_job(now).unwrap();
            q.complete(&job.id, now);
        }
        assert_eq!(q.counts().completed, 2);
    }

    #[test]
    fn attempts_never_exceed_max() {
        let q = JobQueue::new(
            "scraping",
            QueueConfig {
                max_retries: 2,
                backoff_initial_ms: 0,
                ..Default::default()
            },
        );
        q.enqueue("j", data(), JobOptions::default());
        let mut now = Utc::now();
        loop {
            match q.next_job(now) {
                Some(job) => {
                    assert!(job.attempts_made <= job.max_attempts);
                    q.fail(&job.id, "x", now);
                    now += chrono::Duration::seconds(1);
                }
                None => break,
            }
        }
        assert_eq!(q.counts().failed, 1);
    }

    #[test]
    fn standard_manager_has_four_queues() {
        let manager = QueueManager::standard(QueueConfig::default());
        assert_eq!(manager.names().len(), 4);
        assert!(manager.get(WEBHOOK_PROCESSING).unwrap().config().dead_letter);
        assert!(!manager.get(SCRAPING).unwrap().config().dead_letter);
    }
}
