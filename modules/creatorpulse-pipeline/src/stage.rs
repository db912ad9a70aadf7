use serde::Serialize;
use thiserror::Error;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    InputValidation,
    Transformation,
    Normalization,
    DuplicateDetection,
    Merging,
    OutputValidation,
}

impl Stage {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Stage::InputValidation => "INPUT_VALIDATION",
            Stage::Transformation => "TRANSFORMATION",
            Stage::Normalization => "NORMALIZATION",
            Stage::DuplicateDetection => "DUPLICATE_DETECTION",
            Stage::Merging => "MERGING",
            Stage::OutputValidation => "OUTPUT_VALIDATION",
        }
    }

    pub const ALL: [Stage; 6] = [
        Stage::InputValidation,
        Stage::Transformation,
        Stage::Normalization,
        Stage::DuplicateDetection,
        Stage::Merging,
        Stage::OutputValidation,
    ];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Soft failure: recorded, never stops the pipeline.
    Warning,
    /// Hard failure: stops the item under fail-fast, accumulates under
    /// continue.
    Error,
}

/// One problem found while processing an item.
#[derive(Debug, Clone, Serialize)]
pub struct StageIssue {
    pub stage: Stage,
    pub severity: Severity,
    pub message: String,
}

impl StageIssue {
    pub fn warning(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn error(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// How hard failures are handled across a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// First hard failure stops the item.
    FailFast,
    /// Items proceed, accumulating their errors.
    #[default]
    Continue,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} failed: {message}")]
    Stage { stage: Stage, message: String },

    #[error("pipeline batch timed out after {0}ms")]
    Timeout(u64),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Stage { stage, .. } => stage.code(),
            PipelineError::Timeout(_) => "TIMEOUT",
        }
    }
}
