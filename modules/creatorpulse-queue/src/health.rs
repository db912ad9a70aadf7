//! Queue health heuristics.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for QueueHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueHealth::Healthy => write!(f, "healthy"),
            QueueHealth::Degraded => write!(f, "degraded"),
            QueueHealth::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    pub completed: u64,
    pub failed: u64,
    pub active: usize,
    pub waiting: usize,
    pub avg_processing_ms: f64,
}

/// Derive health from observed throughput.
///
/// The stalled-backlog signal (no active work while the backlog is deep) is
/// only meaningful when this process is the one that should be draining the
/// queue, so it is gated behind `is_leader`. Follower instances report on
/// failure ratios alone.
pub fn assess_health(stats: &QueueStats, is_leader: bool) -> QueueHealth {
    let finished = stats.completed + stats.failed;
    let failure_ratio = if finished == 0 {
        0.0
    } else {
        stats.failed as f64 / finished as f64
    };

    if failure_ratio > 0.5 {
        return QueueHealth::Unhealthy;
    }
    if is_leader && stats.active == 0 && stats.waiting > 1000 {
        return QueueHealth::Unhealthy;
    }
    if failure_ratio > 0.2 || stats.avg_processing_ms > 120_000.0 {
        return QueueHealth::Degraded;
    }
    QueueHealth::Healthy
}
