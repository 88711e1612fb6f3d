//! Reconciliation Loop - External Job Definitions
//!
//! Periodically fetches job definitions from the external job source,
//! builds them, and diffs them against the external jobs it scheduled
//! before. Only differences touch the scheduler:
//! - Removed: pushed series deleted, job unscheduled
//! - Changed: registry and pushed series of the old definition dropped,
//!   definition replaced, run immediately
//! - New: added with a staggered first run
//!
//! Local jobs are never touched. Every tick is error-contained.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::config::jobs::JobBuilder;
use crate::domain::error::{ReconcileError, SchedulerError};
use crate::domain::job::{JobOrigin, JobSpec};
use crate::domain::outcome::JobEvent;
use crate::ports::job_source::JobSource;
use crate::ports::registry::MetricStore;
use crate::usecases::scheduler::JobScheduler;

/// What one tick changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
  /// Newly scheduled job ids.
  pub added: Vec<String>,
  /// Redefined job ids.
  pub updated: Vec<String>,
  /// Unscheduled job ids.
  pub removed: Vec<String>,
  /// Jobs left as they were.
  pub unchanged: usize,
  /// Definitions excluded for failing to build or colliding with a
  /// local job.
  pub rejected: Vec<String>,
}

impl ReconcileReport {
  /// Whether the tick touched the scheduler.
  pub fn has_changes(&self) -> bool {
    !(self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty())
  }
}

/// Keeps the external part of the live job set in step with the job
/// source.
pub struct Reconciler {
  /// External job definitions.
  source: Arc<dyn JobSource>,
  /// Turns definitions into specs.
  builder: JobBuilder,
  /// Live job set.
  scheduler: JobScheduler,
  /// Job registries.
  store: Arc<dyn MetricStore>,
  /// Poll interval.
  interval: Duration,
  /// External jobs scheduled by previous ticks.
  known: HashMap<String, Arc<JobSpec>>,
}

impl Reconciler {
  /// Create a reconciler.
  pub fn new(
    source: Arc<dyn JobSource>,
    builder: JobBuilder,
    scheduler: JobScheduler,
    store: Arc<dyn MetricStore>,
    interval: Duration,
  ) -> Self {
    Self {
      source,
      builder,
      scheduler,
      store,
      interval,
      known: HashMap::new(),
    }
  }

  /// Run the reconciliation loop: one tick immediately, then one per
  /// interval. Runs until shutdown.
  #[instrument(skip(self, shutdown_rx))]
  pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
    info!(
      interval_secs = self.interval.as_secs(),
      "Reconciliation loop started"
    );

    loop {
      self.tick_contained().await;

      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Reconciliation loop shutting down");
          return Ok(());
        }
        () = tokio::time::sleep(self.interval) => {}
      }
    }
  }

  async fn tick_contained(&mut self) {
    match self.tick().await {
      Ok(report) if report.has_changes() => {
        info!(
          added = report.added.len(),
          updated = report.updated.len(),
          removed = report.removed.len(),
          rejected = report.rejected.len(),
          "Job set reconciled"
        );
      }
      Ok(report) => debug!(unchanged = report.unchanged, "Job set unchanged"),
      Err(e) => {
        error!(error = %e, "Reconciliation failed");
        self.scheduler.notify(&JobEvent::ReconciliationFailed {
          message: e.to_string(),
        });
      }
    }
  }

  /// Fetch, build and apply the current external definitions once.
  pub async fn tick(&mut self) -> Result<ReconcileReport, ReconcileError> {
    let definitions = self.source.fetch().await?;
    let mut report = ReconcileReport::default();

    let mut desired: BTreeMap<String, JobSpec> = BTreeMap::new();
    for def in &definitions {
      if desired.contains_key(&def.id) {
        warn!(job = %def.id, "Duplicate external job definition ignored");
        continue;
      }
      if self.is_local(&def.id) {
        warn!(job = %def.id, "External job collides with a local job");
        report.rejected.push(def.id.clone());
        continue;
      }
      match self.builder.build(def, JobOrigin::External) {
        Ok(spec) => {
          desired.insert(def.id.clone(), spec);
        }
        Err(e) => {
          warn!(job = %def.id, error = %e, "External job excluded");
          report.rejected.push(def.id.clone());
        }
      }
    }

    // Removed
    let stale: Vec<String> = {
      let wanted: HashSet<&String> = desired.keys().collect();
      let mut stale: Vec<String> = self.known.keys().filter(|id| !wanted.contains(id)).cloned().collect();
      stale.sort();
      stale
    };
    for id in stale {
      self.known.remove(&id);
      match self.scheduler.remove(&id) {
        Ok(removed) => {
          self
            .scheduler
            .supervisor()
            .dispatcher()
            .delete_metrics(&id, &removed.instance, &removed.spec.push)
            .await;
          report.removed.push(id);
        }
        Err(e) => warn!(job = %id, error = %e, "External job already gone"),
      }
    }

    for (id, spec) in desired {
      match self.known.get(&id).cloned() {
        Some(old) if *old == spec => report.unchanged += 1,
        Some(old) => {
          self.redefine(&old, spec).await;
          report.updated.push(id);
        }
        None => match self.scheduler.add(spec.clone()) {
          Ok(_) => {
            self.known.insert(id.clone(), Arc::new(spec));
            report.added.push(id);
          }
          Err(e) => {
            warn!(job = %id, error = %e, "External job could not be scheduled");
            report.rejected.push(id);
          }
        },
      }
    }

    Ok(report)
  }

  async fn redefine(&mut self, old: &JobSpec, spec: JobSpec) {
    let id = spec.id.clone();

    // The old definition stops being current before its registry goes.
    let replaced = match self.scheduler.update(spec.clone()) {
      Ok(_) => true,
      Err(SchedulerError::NotFound(_)) => self.scheduler.add(spec.clone()).is_ok(),
      Err(e) => {
        warn!(job = %id, error = %e, "External job could not be updated");
        false
      }
    };
    if !replaced {
      return;
    }
    self.known.insert(id.clone(), Arc::new(spec));

    let instance = self.store.unregister(&id).unwrap_or_default();
    self
      .scheduler
      .supervisor()
      .dispatcher()
      .delete_metrics(&id, &instance, &old.push)
      .await;
    self.store.register(&id);

    match self.scheduler.run_when_idle(&id) {
      Ok(true) => debug!(job = %id, "Redefined job run immediately"),
      Ok(false) => info!(job = %id, "Redefined job runs once its in-flight run ends"),
      Err(e) => warn!(job = %id, error = %e, "Redefined job not run"),
    }
  }

  fn is_local(&self, id: &str) -> bool {
    !self.known.contains_key(id) && self.scheduler.spec(id).is_some_and(|spec| !spec.is_external())
  }

  /// External job ids currently owned by the loop.
  pub fn known_jobs(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.known.keys().cloned().collect();
    ids.sort();
    ids
  }
}
