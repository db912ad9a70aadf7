//! The staged result pipeline: validate, transform, normalize, detect
//! duplicates, merge, validate again. Items run alone or in batches; one
//! item's failure never takes the batch down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use creatorpulse_common::{Platform, UnifiedCreator};
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::dedup::{detect_duplicate, CreatorLookup, MatchStrategy};
use crate::merge::{merge, MergeStrategy};
use crate::metrics::PipelineMetrics;
use crate::normalize::normalize;
use crate::raw::RawProfile;
use crate::stage::{ErrorMode, PipelineError, Stage, StageIssue};
use crate::transform::{transform, SourceMeta};
use crate::validate::{validate_input, validate_output};

/// Batch-size bounds for adaptive batching.
const MIN_BATCH: usize = 10;
const MAX_BATCH: usize = 500;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub error_mode: ErrorMode,
    /// Parallel-mode semaphore size.
    pub max_concurrency: usize,
    /// Base chunk size for batch mode, before adaptive scaling.
    pub batch_base_size: usize,
    /// Wall-clock budget for a whole batch.
    pub timeout: Duration,
    pub merge_strategy: MergeStrategy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            error_mode: ErrorMode::Continue,
            max_concurrency: 10,
            batch_base_size: 50,
            timeout: Duration::from_secs(300),
            merge_strategy: MergeStrategy::MostComplete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Sequential,
    Parallel,
    Batch,
}

/// What happened to one item.
#[derive(Debug, Clone)]
pub enum ItemAction {
    Created,
    Merged {
        confidence: f64,
        strategy: MatchStrategy,
        merge_strategy: MergeStrategy,
    },
}

#[derive(Debug, Clone)]
pub struct ItemOutcome {
    /// The record to persist; absent when the item failed.
    pub creator: Option<UnifiedCreator>,
    pub action: Option<ItemAction>,
    pub issues: Vec<StageIssue>,
    pub failed: bool,
}

impl ItemOutcome {
    fn failure(issues: Vec<StageIssue>) -> Self {
        Self {
            creator: None,
            action: None,
            issues,
            failed: true,
        }
    }
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub outcomes: Vec<ItemOutcome>,
    pub processed: u64,
    pub failed: u64,
}

/// Scale the base chunk size by available-memory pressure and by how much
/// work is queued, clamped to sane bounds.
pub fn adaptive_batch_size(base: usize, memory_factor: f64, item_count: usize) -> usize {
    let item_factor = if item_count > 1000 {
        0.5
    } else if item_count < 100 {
        2.0
    } else {
        1.0
    };
    ((base as f64 * memory_factor * item_factor) as usize).clamp(MIN_BATCH, MAX_BATCH)
}

pub struct ResultPipeline {
    lookup: Arc<dyn CreatorLookup>,
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
}

impl ResultPipeline {
    pub fn new(lookup: Arc<dyn CreatorLookup>, config: PipelineConfig) -> Self {
        Self {
            lookup,
            config,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run one item through every stage.
    pub async fn process_item(
        &self,
        platform: Platform,
        value: &Value,
        meta: &SourceMeta,
    ) -> ItemOutcome {
        let mut issues = Vec::new();
        let fail_fast = self.config.error_mode == ErrorMode::FailFast;

        // Input validation
        let started = Instant::now();
        let input_issues = validate_input(platform, value);
        let input_hard = input_issues.iter().any(|i| i.is_error());
        self.metrics
            .record_stage(Stage::InputValidation, started.elapsed(), !input_hard);
        issues.extend(input_issues);
        if input_hard && fail_fast {
            return ItemOutcome::failure(issues);
        }

        // Parse into the platform's typed shape; nothing downstream works
        // on a loose map
        let raw = match RawProfile::parse(platform, value) {
            Ok(raw) => raw,
            Err(issue) => {
                issues.push(issue);
                return ItemOutcome::failure(issues);
            }
        };

        // Transformation
        let started = Instant::now();
        let creator = transform(&raw, meta, Utc::now());
        self.metrics
            .record_stage(Stage::Transformation, started.elapsed(), true);

        // Normalization
        let started = Instant::now();
        let mut creator = creator;
        normalize(&mut creator);
        self.metrics
            .record_stage(Stage::Normalization, started.elapsed(), true);

        // Duplicate detection
        let started = Instant::now();
        let duplicate = match detect_duplicate(self.lookup.as_ref(), &creator).await {
            Ok(d) => {
                self.metrics
                    .record_stage(Stage::DuplicateDetection, started.elapsed(), true);
                d
            }
            Err(err) => {
                self.metrics
                    .record_stage(Stage::DuplicateDetection, started.elapsed(), false);
                issues.push(StageIssue::error(
                    Stage::DuplicateDetection,
                    format!("lookup failed: {err}"),
                ));
                if fail_fast {
                    return ItemOutcome::failure(issues);
                }
                None
            }
        };

        // Merging
        let (creator, action) = match duplicate {
            Some(m) => {
                let started = Instant::now();
                let merged = merge(&m.existing, &creator, self.config.merge_strategy);
                self.metrics
                    .record_stage(Stage::Merging, started.elapsed(), true);
                debug!(
                    name = %merged.name,
                    confidence = m.confidence,
                    "Merged into existing creator"
                );
                (
                    merged,
                    ItemAction::Merged {
                        confidence: m.confidence,
                        strategy: m.strategy,
                        merge_strategy: self.config.merge_strategy,
                    },
                )
            }
            None => (creator, ItemAction::Created),
        };

        // Output validation
        let started = Instant::now();
        let output_issues = validate_output(&creator, Utc::now());
        let output_hard = output_issues.iter().any(|i| i.is_error());
        self.metrics
            .record_stage(Stage::OutputValidation, started.elapsed(), !output_hard);
        issues.extend(output_issues);
        if output_hard {
            return ItemOutcome::failure(issues);
        }

        ItemOutcome {
            creator: Some(creator),
            action: Some(action),
            issues,
            failed: false,
        }
    }

    /// Run a batch of items in the requested mode, under the pipeline-wide
    /// timeout.
    pub async fn process_batch(
        &self,
        platform: Platform,
        items: Vec<Value>,
        meta: &SourceMeta,
        mode: BatchMode,
    ) -> Result<BatchOutcome, PipelineError> {
        let timeout_ms = self.config.timeout.as_millis() as u64;
        let work = self.run_batch(platform, items, meta, mode);
        let outcomes = tokio::time::timeout(self.config.timeout, work)
            .await
            .map_err(|_| {
                warn!(timeout_ms, "Pipeline batch timed out");
                PipelineError::Timeout(timeout_ms)
            })?;

        let failed = outcomes.iter().filter(|o| o.failed).count() as u64;
        let processed = outcomes.len() as u64 - failed;
        self.metrics.record_batch(processed, failed);

        Ok(BatchOutcome {
            processed,
            failed,
            outcomes,
        })
    }

    async fn run_batch(
        &self,
        platform: Platform,
        items: Vec<Value>,
        meta: &SourceMeta,
        mode: BatchMode,
    ) -> Vec<ItemOutcome> {
        match mode {
            BatchMode::Sequential => {
                let mut outcomes = Vec::with_capacity(items.len());
                for item in &items {
                    outcomes.push(self.process_item(platform, item, meta).await);
                }
                outcomes
            }
            BatchMode::Parallel => self.run_parallel(platform, &items, meta).await,
            BatchMode::Batch => {
                let chunk_size = adaptive_batch_size(self.config.batch_base_size, 1.0, items.len());
                let mut outcomes = Vec::with_capacity(items.len());
                for chunk in items.chunks(chunk_size) {
                    outcomes.extend(self.run_parallel(platform, chunk, meta).await);
                }
                outcomes
            }
        }
    }

    /// Items in flight bounded by the semaphore; each item settles on its
    /// own, so one failure cannot reject the rest.
    async fn run_parallel(
        &self,
        platform: Platform,
        items: &[Value],
        meta: &SourceMeta,
    ) -> Vec<ItemOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let futures = items.iter().map(|item| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                self.process_item(platform, item, meta).await
            }
        });
        join_all(futures).await
    }
}
