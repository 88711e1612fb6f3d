//! Domain layer - Metric model, normalization and job descriptors.
//!
//! Pure logic with no I/O (hexagonal architecture inner ring). Source
//! records go in, canonical labeled samples come out.

pub mod aggregation;
pub mod error;
pub mod job;
pub mod metric;
pub mod metric_path;
pub mod normalize;
pub mod outcome;

// Re-export core types for convenience
pub use aggregation::{Aggregation, AggregationFunc, Threshold, ThresholdOp};
pub use error::{
    AggregationError, CollectError, ConfigError, JobSourceError, PushError, ReconcileError,
    RegistryError, SchedulerError,
};
pub use job::{Category, CategoryParams, JobOrigin, JobSpec, SourceRef, WorkerPool};
pub use metric::{Labels, MetricSample, MetricSet};
pub use outcome::{ExecutionOutcome, FailureKind, JobEvent, MissReason, RunStatus};
