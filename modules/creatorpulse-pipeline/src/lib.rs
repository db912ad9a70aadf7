pub mod dedup;
pub mod merge;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod raw;
pub mod stage;
pub mod transform;
pub mod validate;

pub use dedup::{detect_duplicate, CreatorLookup, DuplicateMatch, MatchStrategy};
pub use merge::{merge, MergeStrategy};
pub use metrics::{MetricsReport, PipelineMetrics};
pub use pipeline::{
    BatchMode, BatchOutcome, ItemAction, ItemOutcome, PipelineConfig, ResultPipeline,
};
pub use raw::RawProfile;
pub use stage::{ErrorMode, PipelineError, Severity, Stage, StageIssue};
pub use transform::SourceMeta;
