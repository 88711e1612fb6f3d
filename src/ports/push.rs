//! Push Port - Remote Metric Aggregator Interface
//!
//! Destinations encode the snapshot themselves. Whether the body carries
//! sample timestamps is decided by the destination's mode.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::error::PushError;
use crate::domain::metric::MetricSet;

/// Delivery semantics of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PushMode {
  /// Gateway semantics: timestamps are stripped, the receiver stamps
  /// samples on scrape.
  Gateway,
  /// Samples keep their original timestamps.
  Timestamped,
}

/// Identifies a job's series at a destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupingKey {
  /// Job id.
  pub job: String,
  /// Cached instance label, when non-empty.
  pub instance: Option<String>,
}

impl GroupingKey {
  /// Key for `job`, with the instance only when it is non-empty.
  pub fn new(job: impl Into<String>, instance: &str) -> Self {
    Self {
      job: job.into(),
      instance: (!instance.is_empty()).then(|| instance.to_string()),
    }
  }

  /// Ordered `(label, value)` pairs.
  pub fn pairs(&self) -> Vec<(&str, &str)> {
    let mut pairs = vec![("job", self.job.as_str())];
    if let Some(instance) = &self.instance {
      pairs.push(("instance", instance.as_str()));
    }
    pairs
  }
}

impl fmt::Display for GroupingKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.instance {
      Some(instance) => write!(f, "job={},instance={}", self.job, instance),
      None => write!(f, "job={}", self.job),
    }
  }
}

/// A remote metrics aggregator.
#[async_trait]
pub trait PushDestination: Send + Sync + 'static {
  /// Configured destination name.
  fn name(&self) -> &str;

  /// Delivery semantics.
  fn mode(&self) -> PushMode;

  /// Replace the series under `key` with `metrics`.
  async fn push(&self, key: &GroupingKey, metrics: &MetricSet) -> Result<(), PushError>;

  /// Delete every series under `key`.
  async fn delete(&self, key: &GroupingKey) -> Result<(), PushError>;
}
