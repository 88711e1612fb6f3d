//! Execution Supervisor - Deadline-Bounded Job Runs
//!
//! Runs one job's adapter call as a separate abortable task and waits
//! up to the job's deadline. Completed runs replace the job's snapshot
//! and are pushed; failed and timed-out runs leave the prior snapshot
//! in place. A run whose definition stopped being current while it was
//! collecting is discarded unpublished.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::CollectError;
use crate::domain::job::{Category, JobSpec};
use crate::domain::metric::MetricSet;
use crate::domain::outcome::{ExecutionOutcome, FailureKind, RunStatus};
use crate::ports::collector::AdapterTable;
use crate::ports::registry::MetricStore;
use crate::usecases::dispatcher::PushDispatcher;

/// How execution deadlines are derived.
#[derive(Debug, Clone)]
pub struct DeadlinePolicy {
  /// Whether runs are bounded at all.
  pub enabled: bool,
  /// Subtracted from the time left until the next firing.
  pub safety_margin: Duration,
  /// Floor for the computed deadline.
  pub min_deadline: Duration,
  /// Categories that always run unbounded.
  pub exempt: HashSet<Category>,
}

impl Default for DeadlinePolicy {
  fn default() -> Self {
    Self {
      enabled: true,
      safety_margin: Duration::from_secs(5),
      min_deadline: Duration::from_secs(10),
      exempt: HashSet::new(),
    }
  }
}

impl DeadlinePolicy {
  /// Deadline for a run of `category` whose next firing is `next_run`.
  pub fn deadline(&self, category: Category, next_run: Option<Instant>, now: Instant) -> Option<Duration> {
    if !self.enabled || self.exempt.contains(&category) {
      return None;
    }
    let remaining = next_run?.saturating_duration_since(now);
    Some(remaining.saturating_sub(self.safety_margin).max(self.min_deadline))
  }
}

/// Runs jobs against their source adapters.
pub struct ExecutionSupervisor {
  adapters: AdapterTable,
  store: Arc<dyn MetricStore>,
  dispatcher: PushDispatcher,
  policy: DeadlinePolicy,
}

impl ExecutionSupervisor {
  /// Create a supervisor.
  pub fn new(adapters: AdapterTable, store: Arc<dyn MetricStore>, dispatcher: PushDispatcher, policy: DeadlinePolicy) -> Self {
    Self {
      adapters,
      store,
      dispatcher,
      policy,
    }
  }

  /// Push dispatcher, shared with the reconciliation loop.
  pub fn dispatcher(&self) -> &PushDispatcher {
    &self.dispatcher
  }

  /// Run `job` once.
  pub async fn execute(&self, job: &Arc<JobSpec>, next_run: Option<Instant>) -> ExecutionOutcome {
    self.execute_while(job, next_run, &|| true).await
  }

  /// Run `job` once, publishing only if `is_current` still holds once
  /// collection finishes.
  #[instrument(skip(self, job, next_run, is_current), fields(job = %job.id, category = %job.category))]
  pub async fn execute_while(
    &self,
    job: &Arc<JobSpec>,
    next_run: Option<Instant>,
    is_current: &(dyn Fn() -> bool + Send + Sync),
  ) -> ExecutionOutcome {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let start = Instant::now();
    let deadline = self.policy.deadline(job.category, next_run, start);

    let (status, push_failures) = match self.collect(job, deadline).await {
      Ok(metrics) if is_current() => self.publish(job, metrics).await,
      Ok(metrics) => {
        warn!(job = %job.id, "Definition replaced during run, discarding snapshot");
        (RunStatus::Completed { series: metrics.series_count() }, Vec::new())
      }
      Err(status) => (status, Vec::new()),
    };

    let outcome = ExecutionOutcome {
      run_id,
      job_id: job.id.clone(),
      category: job.category,
      started_at,
      duration: start.elapsed(),
      status,
      push_failures,
    };

    match &outcome.status {
      RunStatus::Completed { series } => {
        info!(%run_id, series, duration_ms = outcome.duration.as_millis() as u64, "Job run completed");
      }
      RunStatus::Failed { kind, message } => {
        error!(%run_id, kind = %kind, error = %message, "Job run failed");
      }
      RunStatus::TimedOut { deadline } => {
        error!(%run_id, deadline_ms = deadline.as_millis() as u64, "Job run timed out");
      }
    }
    outcome
  }

  async fn collect(&self, job: &Arc<JobSpec>, deadline: Option<Duration>) -> Result<MetricSet, RunStatus> {
    let Some(adapter) = self.adapters.get(job.category) else {
      return Err(RunStatus::Failed {
        kind: FailureKind::Configuration,
        message: format!("no source adapter for category '{}'", job.category),
      });
    };

    let spec = Arc::clone(job);
    let mut handle = tokio::spawn(async move { adapter.collect(&spec).await });

    let joined = match deadline {
      Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
        Ok(joined) => joined,
        Err(_) => {
          handle.abort();
          return Err(RunStatus::TimedOut { deadline: limit });
        }
      },
      None => handle.await,
    };

    match joined {
      Ok(Ok(metrics)) => Ok(metrics),
      Ok(Err(e)) => Err(RunStatus::Failed {
        kind: classify(&e),
        message: e.to_string(),
      }),
      Err(e) if e.is_panic() => Err(RunStatus::Failed {
        kind: FailureKind::Panic,
        message: "source adapter panicked".to_string(),
      }),
      Err(e) => Err(RunStatus::Failed {
        kind: FailureKind::Panic,
        message: e.to_string(),
      }),
    }
  }

  async fn publish(&self, job: &JobSpec, metrics: MetricSet) -> (RunStatus, Vec<String>) {
    let series = metrics.series_count();
    let snapshot = match self.store.set_metrics(&job.id, metrics) {
      Ok(snapshot) => snapshot,
      Err(e) => {
        // Job was removed while the run was in flight.
        warn!(job = %job.id, error = %e, "Discarding snapshot");
        return (RunStatus::Completed { series }, Vec::new());
      }
    };

    if !job.pushes() {
      return (RunStatus::Completed { series }, Vec::new());
    }

    let instance = self.store.instance(&job.id).unwrap_or_default();
    let report = self.dispatcher.dispatch(&job.id, &snapshot, &instance, &job.push).await;
    debug!(job = %job.id, failed = report.failed.len(), "Snapshot dispatched");
    (RunStatus::Completed { series }, report.failed_names())
  }
}

/// Failure kind for an adapter error.
pub fn classify(error: &CollectError) -> FailureKind {
  match error {
    CollectError::SourceConnection { .. } | CollectError::Query { .. } => FailureKind::SourceConnection,
    CollectError::MissingFields { .. } | CollectError::CategoryMismatch { .. } => FailureKind::Configuration,
  }
}
