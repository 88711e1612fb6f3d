//! Job Model - Immutable Job Descriptors
//!
//! A `JobSpec` is built once from a raw definition and never mutated.
//! Updating a job replaces the whole spec; structural equality is what
//! the reconciliation loop uses to decide whether a job changed.

use std::fmt;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::aggregation::Aggregation;

/// Source category. Selects the adapter that collects the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// SQL statement against a relational database.
    Database,
    /// Hierarchical metric tree (AppDynamics metric-data).
    AppDynamics,
    /// Grouped stats (ExtraHop metrics).
    ExtraHop,
}

impl Category {
    /// All categories, in adapter-table order.
    pub const ALL: [Self; 3] = [Self::Database, Self::AppDynamics, Self::ExtraHop];

    /// Lower-case name used in config, logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::AppDynamics => "appdynamics",
            Self::ExtraHop => "extrahop",
        }
    }

    /// Worker pool the category's runs are gated by.
    pub fn pool(&self) -> WorkerPool {
        match self {
            Self::Database => WorkerPool::Heavy,
            Self::AppDynamics | Self::ExtraHop => WorkerPool::Default,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded executor a run waits on before starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerPool {
    /// Many lightweight network calls.
    Default,
    /// Driver-bound database work.
    Heavy,
}

/// Where a job definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOrigin {
    /// Local configuration. Never touched by reconciliation.
    Local,
    /// External job source. Owned by the reconciliation loop.
    External,
}

/// A resolved source service reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    /// Service name as configured, including any `[instance]` suffix.
    pub name: String,
    /// Lower-cased name without the instance suffix.
    pub prefix: String,
    /// Bracketed instance, when present.
    pub instance: Option<String>,
    /// Timezone used to localize naive timestamps.
    pub timezone: Tz,
}

/// Category-specific job parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CategoryParams {
    /// Database statement.
    Database {
        /// SQL text.
        statement: String,
        /// Columns holding metric values.
        value_columns: Vec<String>,
        /// Column holding the row timestamp.
        timestamp_column: Option<String>,
    },
    /// Metric-tree query.
    MetricTree {
        /// Application name.
        application: String,
        /// Metric path, possibly with wildcards.
        metric_path: String,
        /// Rollup window.
        duration_minutes: u64,
    },
    /// Grouped stats query.
    Stats {
        /// Vendor query parameters, passed through.
        metric_params: Value,
        /// Metric name component.
        metric_name: String,
        /// Reductions applied per group.
        aggregation: Aggregation,
        /// Lookback window.
        duration_minutes: u64,
    },
}

/// Immutable job descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSpec {
    /// Unique job id.
    pub id: String,
    /// Source category.
    pub category: Category,
    /// Source services, in configured order.
    pub sources: Vec<SourceRef>,
    /// Push destination names.
    pub push: Vec<String>,
    /// Trigger interval in minutes.
    pub interval_minutes: u64,
    /// Category-specific parameters.
    pub params: CategoryParams,
    /// Static labels with formatted keys, in configured order.
    pub static_labels: Vec<(String, String)>,
    /// Definition origin.
    pub origin: JobOrigin,
}

impl JobSpec {
    /// Trigger interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    /// Whether snapshots are pushed anywhere.
    pub fn pushes(&self) -> bool {
        !self.push.is_empty()
    }

    /// Whether the spec came from the external job source.
    pub fn is_external(&self) -> bool {
        self.origin == JobOrigin::External
    }
}
