//! Control Facade - Exposition and Scheduler Operations
//!
//! The operations offered to the HTTP layer. Thin delegation to the
//! metric store and the job scheduler with typed errors.

use std::sync::Arc;

use crate::domain::error::{RegistryError, SchedulerError};
use crate::ports::registry::MetricStore;
use crate::usecases::scheduler::{JobInfo, JobScheduler, SchedulerInfo, SchedulerState};

/// Exposition and scheduler control.
#[derive(Clone)]
pub struct ControlApi {
  scheduler: JobScheduler,
  store: Arc<dyn MetricStore>,
}

impl ControlApi {
  /// Create the facade.
  pub fn new(scheduler: JobScheduler, store: Arc<dyn MetricStore>) -> Self {
    Self { scheduler, store }
  }

  /// Exposition text for every job plus process instrumentation.
  pub fn aggregate_metrics(&self) -> Result<String, RegistryError> {
    self.store.render_aggregate()
  }

  /// Exposition text for one job.
  pub fn job_metrics(&self, job_id: &str) -> Result<String, RegistryError> {
    self.store.render_job(job_id)
  }

  /// Scheduler state and job count.
  pub fn scheduler_info(&self) -> SchedulerInfo {
    self.scheduler.info()
  }

  /// Every job.
  pub fn list_jobs(&self) -> Vec<JobInfo> {
    self.scheduler.list_jobs()
  }

  /// One job.
  pub fn get_job(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
    self.scheduler.get_job(job_id)
  }

  /// Pause one job.
  pub fn pause_job(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
    self.scheduler.pause(job_id)
  }

  /// Resume one job.
  pub fn resume_job(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
    self.scheduler.resume(job_id)
  }

  /// Run one job now.
  pub fn run_job_now(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
    self.scheduler.run_now(job_id)
  }

  /// Whether the scheduler is accepting triggers.
  pub fn is_ready(&self) -> bool {
    self.scheduler.info().state == SchedulerState::Running
  }
}
