//! Execution Outcomes and Scheduler Events
//!
//! Every run produces exactly one `ExecutionOutcome`; every dropped
//! firing produces a `Missed` event. Listeners consume both.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::job::Category;

/// Failure classification used as the `kind` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Job or result shape does not match the configuration.
    Configuration,
    /// Source unreachable or query rejected.
    SourceConnection,
    /// Deadline exceeded.
    Timeout,
    /// Adapter task panicked.
    Panic,
}

impl FailureKind {
    /// Label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::SourceConnection => "source_connection",
            Self::Timeout => "timeout",
            Self::Panic => "panic",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Adapter returned a metric set.
    Completed {
        /// Number of series collected.
        series: usize,
    },
    /// Adapter failed.
    Failed {
        /// Classification.
        kind: FailureKind,
        /// Error message.
        message: String,
    },
    /// Adapter did not finish before the deadline and was aborted.
    TimedOut {
        /// Deadline that was applied.
        deadline: Duration,
    },
}

impl RunStatus {
    /// Failure kind for non-completed runs.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { kind, .. } => Some(*kind),
            Self::TimedOut { .. } => Some(FailureKind::Timeout),
        }
    }
}

/// Record of one run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    /// Unique run id.
    pub run_id: Uuid,
    /// Job id.
    pub job_id: String,
    /// Job category.
    pub category: Category,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Time spent in the run.
    pub duration: Duration,
    /// Terminal state.
    pub status: RunStatus,
    /// Push destinations that rejected or could not receive the snapshot.
    pub push_failures: Vec<String>,
}

impl ExecutionOutcome {
    /// Whether the run completed.
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Completed { .. })
    }
}

/// Why a firing did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    /// A previous run of the job is still in flight.
    AlreadyRunning,
    /// The firing could not start within the misfire grace window.
    Misfire,
}

impl MissReason {
    /// Label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "already_running",
            Self::Misfire => "misfire",
        }
    }
}

/// Event delivered to scheduler listeners.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A run finished.
    Executed(ExecutionOutcome),
    /// A firing was dropped.
    Missed {
        /// Job id.
        job_id: String,
        /// Reason.
        reason: MissReason,
    },
    /// A job was added to or removed from the live set.
    JobSetChanged {
        /// Live job count after the change.
        job_count: usize,
    },
    /// A reconciliation tick failed.
    ReconciliationFailed {
        /// Error message.
        message: String,
    },
}
