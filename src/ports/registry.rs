//! Metric Store Port - Per-Job Snapshot Registry
//!
//! The execution supervisor writes snapshots here; the control surface
//! and the reconciliation loop read and retire them.

use std::sync::Arc;

use crate::domain::error::RegistryError;
use crate::domain::metric::MetricSet;

/// Per-job metric registries with pull rendering.
pub trait MetricStore: Send + Sync + 'static {
  /// Create the job's registry. No-op when it already exists.
  fn register(&self, job_id: &str);

  /// Atomically replace the job's snapshot. The first successful call
  /// fixes the job's instance label.
  fn set_metrics(&self, job_id: &str, metrics: MetricSet) -> Result<Arc<MetricSet>, RegistryError>;

  /// Drop the job's registry and return its cached instance label
  /// (empty when never resolved). `None` when the job is unknown.
  fn unregister(&self, job_id: &str) -> Option<String>;

  /// Cached instance label.
  fn instance(&self, job_id: &str) -> Option<String>;

  /// Whether the job has a registry in this process.
  fn contains(&self, job_id: &str) -> bool;

  /// Current snapshot.
  fn snapshot(&self, job_id: &str) -> Option<Arc<MetricSet>>;

  /// Exposition text for one job.
  fn render_job(&self, job_id: &str) -> Result<String, RegistryError>;

  /// Exposition text for every job plus process instrumentation.
  fn render_aggregate(&self) -> Result<String, RegistryError>;
}
