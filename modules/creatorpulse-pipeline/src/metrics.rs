//! Per-stage pipeline metrics: counts, failures, and cumulative timings,
//! aggregated per process and exportable for the metrics surface.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::stage::Stage;

#[derive(Debug, Default, Clone, Serialize)]
pub struct StageAggregate {
    pub executions: u64,
    pub failures: u64,
    pub total_ms: u64,
}

impl StageAggregate {
    pub fn avg_ms(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.executions as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub batches: u64,
    pub items_processed: u64,
    pub items_failed: u64,
    pub stages: HashMap<String, StageAggregate>,
}

#[derive(Debug, Default)]
struct MetricsState {
    batches: u64,
    items_processed: u64,
    items_failed: u64,
    stages: HashMap<Stage, StageAggregate>,
}

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    state: Mutex<MetricsState>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_stage(&self, stage: Stage, elapsed: Duration, ok: bool) {
        let mut state = self.state.lock().expect("metrics lock poisoned");
        let agg = state.stages.entry(stage).or_default();
        agg.executions += 1;
        agg.total_ms += elapsed.as_millis() as u64;
        if !ok {
            agg.failures += 1;
        }
    }

    pub fn record_batch(&self, processed: u64, failed: u64) {
        let mut state = self.state.lock().expect("metrics lock poisoned");
        state.batches += 1;
        state.items_processed += processed;
        state.items_failed += failed;
    }

    pub fn report(&self) -> MetricsReport {
        let state = self.state.lock().expect("metrics lock poisoned");
        MetricsReport {
            batches: state.batches,
            items_processed: state.items_processed,
            items_failed: state.items_failed,
            stages: state
                .stages
                .iter()
                .map(|(stage, agg)| (stage.code().to_string(), agg.clone()))
                .collect(),
        }
    }
}
