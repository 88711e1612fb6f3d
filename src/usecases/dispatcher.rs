//! Push Dispatcher - Snapshot Delivery to Remote Aggregators
//!
//! Delivers a job's snapshot to every configured destination. Attempts
//! are independent: a failing destination is logged and reported but
//! never blocks the others.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, instrument, warn};

use crate::domain::error::PushError;
use crate::domain::metric::MetricSet;
use crate::ports::push::{GroupingKey, PushDestination};

/// Result of one dispatch across several destinations.
#[derive(Debug, Default)]
pub struct DispatchReport {
  /// Destinations that accepted the request.
  pub delivered: Vec<String>,
  /// Destinations that failed, with the reason.
  pub failed: Vec<(String, PushError)>,
}

impl DispatchReport {
  /// Names of the failed destinations.
  pub fn failed_names(&self) -> Vec<String> {
    self.failed.iter().map(|(name, _)| name.clone()).collect()
  }
}

/// Fans snapshots out to named push destinations.
#[derive(Clone, Default)]
pub struct PushDispatcher {
  /// Configured destinations by name.
  destinations: HashMap<String, Arc<dyn PushDestination>>,
}

impl PushDispatcher {
  /// Create a dispatcher over `destinations`.
  pub fn new(destinations: impl IntoIterator<Item = Arc<dyn PushDestination>>) -> Self {
    Self {
      destinations: destinations
        .into_iter()
        .map(|d| (d.name().to_string(), d))
        .collect(),
    }
  }

  /// Whether a destination is configured under `name`.
  pub fn has_destination(&self, name: &str) -> bool {
    self.destinations.contains_key(name)
  }

  /// Push `metrics` to every destination in `names`.
  #[instrument(skip(self, metrics, names), fields(job = %job_id, destinations = names.len()))]
  pub async fn dispatch(&self, job_id: &str, metrics: &MetricSet, instance: &str, names: &[String]) -> DispatchReport {
    let key = GroupingKey::new(job_id, instance);
    let attempts = names.iter().map(|name| {
      let key = &key;
      async move {
        let result = match self.destinations.get(name) {
          Some(destination) => destination.push(key, metrics).await,
          None => Err(PushError::UnknownDestination(name.clone())),
        };
        (name.clone(), result)
      }
    });

    let report = Self::collect(join_all(attempts).await);
    for (name, error) in &report.failed {
      warn!(job = %job_id, destination = %name, grouping_key = %key, error = %error, "Push failed");
    }
    debug!(job = %job_id, delivered = report.delivered.len(), "Push dispatched");
    report
  }

  /// Delete the job's series at every destination in `names`.
  #[instrument(skip(self, names), fields(job = %job_id))]
  pub async fn delete_metrics(&self, job_id: &str, instance: &str, names: &[String]) -> DispatchReport {
    let key = GroupingKey::new(job_id, instance);
    let attempts = names.iter().map(|name| {
      let key = &key;
      async move {
        let result = match self.destinations.get(name) {
          Some(destination) => destination.delete(key).await,
          None => Err(PushError::UnknownDestination(name.clone())),
        };
        (name.clone(), result)
      }
    });

    let report = Self::collect(join_all(attempts).await);
    for (name, error) in &report.failed {
      warn!(job = %job_id, destination = %name, grouping_key = %key, error = %error, "Push delete failed");
    }
    report
  }

  fn collect(results: Vec<(String, Result<(), PushError>)>) -> DispatchReport {
    let mut report = DispatchReport::default();
    for (name, result) in results {
      match result {
        Ok(()) => report.delivered.push(name),
        Err(e) => report.failed.push((name, e)),
      }
    }
    report
  }
}

impl fmt::Debug for PushDispatcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut names: Vec<&String> = self.destinations.keys().collect();
    names.sort();
    f.debug_struct("PushDispatcher").field("destinations", &names).finish()
  }
}
