//! Job Scheduler - Interval Triggers and Job Lifecycle
//!
//! Holds the live job set and per-job trigger state. A single trigger
//! loop wakes at the earliest due time, coalesces overdue firings into
//! one, and spawns each run onto a bounded worker pool. The loop itself
//! never awaits a job body.
//!
//! Policies:
//! - One in-flight run per job id; a firing that finds the job running
//!   is dropped and reported as `already_running`. The in-flight flag is
//!   keyed by id and outlives removal, so a job removed and re-added
//!   while its old run is still going cannot start a second run
//! - A run whose definition was replaced or removed while in flight
//!   publishes nothing
//! - A firing that cannot start within the misfire grace window,
//!   including time spent waiting for a pool worker, is dropped and
//!   reported as `misfire`
//! - First runs of added jobs are staggered

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Notify, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::domain::error::SchedulerError;
use crate::domain::job::{JobSpec, WorkerPool};
use crate::domain::outcome::{JobEvent, MissReason};
use crate::ports::events::JobListener;
use crate::ports::registry::MetricStore;
use crate::usecases::supervisor::ExecutionSupervisor;

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  /// Delay between the first runs of consecutively added jobs.
  pub stagger: Duration,
  /// How late a firing may start before it is dropped.
  pub misfire_grace: Duration,
  /// Workers for lightweight network jobs.
  pub default_workers: usize,
  /// Workers for driver-bound database jobs.
  pub heavy_workers: usize,
  /// Pause a job after a failed or timed-out run.
  pub suspend_on_failure: bool,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      stagger: Duration::from_secs(5),
      misfire_grace: Duration::from_secs(5),
      default_workers: 20,
      heavy_workers: std::thread::available_parallelism().map_or(4, usize::from),
      suspend_on_failure: false,
    }
  }
}

/// Scheduler-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
  /// Triggers fire.
  Running,
  /// No trigger fires until resumed.
  Paused,
}

/// Scheduler summary.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerInfo {
  /// Scheduler-level state.
  pub state: SchedulerState,
  /// Live job count.
  pub job_count: usize,
}

/// Job descriptor with trigger state.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
  /// Job definition.
  #[serde(flatten)]
  pub spec: JobSpec,
  /// Whether the job's trigger is paused.
  pub paused: bool,
  /// Whether a run is in flight.
  pub running: bool,
  /// Next firing, when not paused.
  pub next_run_time: Option<DateTime<Utc>>,
}

/// A job taken out of the live set.
#[derive(Debug, Clone)]
pub struct RemovedJob {
  /// Removed definition.
  pub spec: Arc<JobSpec>,
  /// Cached instance label of the removed registry, or "".
  pub instance: String,
}

struct Slot {
  spec: Arc<JobSpec>,
  /// `None` while the job is paused.
  next_run: Option<Instant>,
  running: Arc<AtomicBool>,
}

impl Slot {
  fn info(&self, now: Instant) -> JobInfo {
    JobInfo {
      spec: (*self.spec).clone(),
      paused: self.next_run.is_none(),
      running: self.running.load(Ordering::Acquire),
      next_run_time: self.next_run.map(|at| wall_clock(at, now)),
    }
  }

  /// Claim the job for an immediate run. An active trigger restarts one
  /// interval from `now`.
  fn fire_now(&mut self, now: Instant) -> Option<Firing> {
    let guard = RunningGuard::acquire(&self.running)?;
    if self.next_run.is_some() {
      self.next_run = Some(now + self.spec.interval());
    }
    Some(Firing {
      spec: Arc::clone(&self.spec),
      scheduled: now,
      next_run: self.next_run,
      guard,
      enforce_grace: false,
    })
  }
}

struct State {
  slots: BTreeMap<String, Slot>,
  /// Running flags by job id. An entry stays while its run is in flight,
  /// even after the slot is gone.
  in_flight: BTreeMap<String, Arc<AtomicBool>>,
  /// Jobs owed an immediate run once their in-flight run ends.
  queued: BTreeSet<String>,
  paused: bool,
  stagger_cursor: Instant,
}

impl State {
  fn running_flag(&mut self, job_id: &str) -> Arc<AtomicBool> {
    Arc::clone(
      self
        .in_flight
        .entry(job_id.to_string())
        .or_insert_with(|| Arc::new(AtomicBool::new(false))),
    )
  }
}

/// Clears a job's running flag when the run ends, however it ends.
struct RunningGuard(Arc<AtomicBool>);

impl RunningGuard {
  fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(Arc::clone(flag)))
  }
}

impl Drop for RunningGuard {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// A run ready to be spawned.
struct Firing {
  spec: Arc<JobSpec>,
  scheduled: Instant,
  next_run: Option<Instant>,
  guard: RunningGuard,
  enforce_grace: bool,
}

struct Inner {
  config: SchedulerConfig,
  supervisor: ExecutionSupervisor,
  store: Arc<dyn MetricStore>,
  state: Mutex<State>,
  listeners: RwLock<Vec<Arc<dyn JobListener>>>,
  default_pool: Arc<Semaphore>,
  heavy_pool: Arc<Semaphore>,
  wake: Notify,
}

/// Interval scheduler over the live job set. Cheap to clone.
#[derive(Clone)]
pub struct JobScheduler {
  inner: Arc<Inner>,
}

impl JobScheduler {
  /// Create a scheduler. It starts paused; attach listeners, then call
  /// `resume_all`.
  pub fn new(config: SchedulerConfig, supervisor: ExecutionSupervisor, store: Arc<dyn MetricStore>) -> Self {
    let default_pool = Arc::new(Semaphore::new(config.default_workers.max(1)));
    let heavy_pool = Arc::new(Semaphore::new(config.heavy_workers.max(1)));
    Self {
      inner: Arc::new(Inner {
        config,
        supervisor,
        store,
        state: Mutex::new(State {
          slots: BTreeMap::new(),
          in_flight: BTreeMap::new(),
          queued: BTreeSet::new(),
          paused: true,
          stagger_cursor: Instant::now(),
        }),
        listeners: RwLock::new(Vec::new()),
        default_pool,
        heavy_pool,
        wake: Notify::new(),
      }),
    }
  }

  /// Execution supervisor used for runs.
  pub fn supervisor(&self) -> &ExecutionSupervisor {
    &self.inner.supervisor
  }

  /// Register an event listener.
  pub fn add_listener(&self, listener: Arc<dyn JobListener>) {
    self
      .inner
      .listeners
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .push(listener);
  }

  /// Deliver `event` to every listener.
  pub fn notify(&self, event: &JobEvent) {
    self.inner.emit(event);
  }

  /// Add a job. Its first run is staggered after previously added jobs.
  pub fn add(&self, spec: JobSpec) -> Result<JobInfo, SchedulerError> {
    let now = Instant::now();
    let (info, job_count) = {
      let mut state = self.inner.lock();
      if state.slots.contains_key(&spec.id) {
        return Err(SchedulerError::Duplicate(spec.id));
      }

      state.stagger_cursor = state.stagger_cursor.max(now) + self.inner.config.stagger;
      let slot = Slot {
        running: state.running_flag(&spec.id),
        spec: Arc::new(spec),
        next_run: Some(state.stagger_cursor),
      };
      let info = slot.info(now);
      self.inner.store.register(&slot.spec.id);
      state.slots.insert(slot.spec.id.clone(), slot);
      (info, state.slots.len())
    };

    info!(job = %info.spec.id, category = %info.spec.category, interval_minutes = info.spec.interval_minutes, "Job added");
    self.inner.emit(&JobEvent::JobSetChanged { job_count });
    self.inner.wake.notify_one();
    Ok(info)
  }

  /// Replace a job's definition. The trigger keeps its next firing
  /// unless the interval changed.
  pub fn update(&self, spec: JobSpec) -> Result<JobInfo, SchedulerError> {
    let now = Instant::now();
    let info = {
      let mut state = self.inner.lock();
      let slot = state
        .slots
        .get_mut(&spec.id)
        .ok_or_else(|| SchedulerError::NotFound(spec.id.clone()))?;

      if slot.spec.interval_minutes != spec.interval_minutes && slot.next_run.is_some() {
        slot.next_run = Some(now + spec.interval());
      }
      slot.spec = Arc::new(spec);
      slot.info(now)
    };

    info!(job = %info.spec.id, "Job updated");
    self.inner.wake.notify_one();
    Ok(info)
  }

  /// Remove a job and drop its registry.
  pub fn remove(&self, job_id: &str) -> Result<RemovedJob, SchedulerError> {
    let (slot, job_count) = {
      let mut state = self.inner.lock();
      let slot = state
        .slots
        .remove(job_id)
        .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))?;
      state.queued.remove(job_id);
      if !slot.running.load(Ordering::Acquire) {
        state.in_flight.remove(job_id);
      }
      (slot, state.slots.len())
    };

    let instance = self.inner.store.unregister(job_id).unwrap_or_default();
    info!(job = job_id, "Job removed");
    self.inner.emit(&JobEvent::JobSetChanged { job_count });
    Ok(RemovedJob {
      spec: slot.spec,
      instance,
    })
  }

  /// Stop a job's trigger.
  pub fn pause(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
    let info = self.inner.with_slot(job_id, |slot, now| {
      slot.next_run = None;
      slot.info(now)
    })?;
    info!(job = job_id, "Job paused");
    Ok(info)
  }

  /// Restart a paused job's trigger one interval from now.
  pub fn resume(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
    let info = self.inner.with_slot(job_id, |slot, now| {
      if slot.next_run.is_none() {
        slot.next_run = Some(now + slot.spec.interval());
      }
      slot.info(now)
    })?;
    info!(job = job_id, "Job resumed");
    self.inner.wake.notify_one();
    Ok(info)
  }

  /// Run a job immediately. Fails when a run is already in flight.
  /// An active trigger restarts one interval from now.
  pub fn run_now(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
    let (firing, info) = self.inner.claim_now(job_id, false)?;

    let Some(firing) = firing else {
      self.inner.emit(&JobEvent::Missed {
        job_id: job_id.to_string(),
        reason: MissReason::AlreadyRunning,
      });
      return Err(SchedulerError::AlreadyRunning(job_id.to_string()));
    };

    info!(job = job_id, "Job run requested");
    tokio::spawn(Inner::run(Arc::clone(&self.inner), firing));
    self.inner.wake.notify_one();
    Ok(info)
  }

  /// Run a job immediately, or as soon as its in-flight run ends.
  /// Returns whether the run started now.
  pub fn run_when_idle(&self, job_id: &str) -> Result<bool, SchedulerError> {
    let (firing, _) = self.inner.claim_now(job_id, true)?;
    let Some(firing) = firing else {
      debug!(job = job_id, "Job run queued behind in-flight run");
      return Ok(false);
    };

    info!(job = job_id, "Job run requested");
    tokio::spawn(Inner::run(Arc::clone(&self.inner), firing));
    self.inner.wake.notify_one();
    Ok(true)
  }

  /// Look up one job.
  pub fn get_job(&self, job_id: &str) -> Result<JobInfo, SchedulerError> {
    let now = Instant::now();
    self
      .inner
      .lock()
      .slots
      .get(job_id)
      .map(|slot| slot.info(now))
      .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))
  }

  /// Every job, ordered by id.
  pub fn list_jobs(&self) -> Vec<JobInfo> {
    let now = Instant::now();
    self.inner.lock().slots.values().map(|slot| slot.info(now)).collect()
  }

  /// Current definition of a job.
  pub fn spec(&self, job_id: &str) -> Option<Arc<JobSpec>> {
    self.inner.lock().slots.get(job_id).map(|slot| Arc::clone(&slot.spec))
  }

  /// Scheduler state and job count.
  pub fn info(&self) -> SchedulerInfo {
    let state = self.inner.lock();
    SchedulerInfo {
      state: if state.paused {
        SchedulerState::Paused
      } else {
        SchedulerState::Running
      },
      job_count: state.slots.len(),
    }
  }

  /// Stop every trigger.
  pub fn pause_all(&self) {
    self.inner.lock().paused = true;
    info!("Scheduler paused");
  }

  /// Let triggers fire.
  pub fn resume_all(&self) {
    self.inner.lock().paused = false;
    info!("Scheduler resumed");
    self.inner.wake.notify_one();
  }

  /// Trigger loop. Runs until shutdown.
  #[instrument(skip(self, shutdown_rx))]
  pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
    info!(
      default_workers = self.inner.config.default_workers,
      heavy_workers = self.inner.config.heavy_workers,
      "Scheduler started"
    );

    loop {
      let next_due = self.inner.fire_due(Instant::now());

      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Scheduler shutting down");
          return Ok(());
        }
        () = self.inner.wake.notified() => {}
        () = sleep_until_due(next_due) => {}
      }
    }
  }
}

impl Inner {
  fn lock(&self) -> std::sync::MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn with_slot<T>(&self, job_id: &str, f: impl FnOnce(&mut Slot, Instant) -> T) -> Result<T, SchedulerError> {
    let now = Instant::now();
    let mut state = self.lock();
    let slot = state
      .slots
      .get_mut(job_id)
      .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))?;
    Ok(f(slot, now))
  }

  /// Claim `job_id` for an immediate run. When a run is in flight and
  /// `queue` is set, the job is owed a run once that one ends.
  fn claim_now(&self, job_id: &str, queue: bool) -> Result<(Option<Firing>, JobInfo), SchedulerError> {
    let now = Instant::now();
    let mut state = self.lock();
    let slot = state
      .slots
      .get_mut(job_id)
      .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))?;

    let firing = slot.fire_now(now);
    let info = slot.info(now);
    if firing.is_none() && queue {
      state.queued.insert(job_id.to_string());
    }
    Ok((firing, info))
  }

  /// Whether `spec` is still the live definition of its job.
  fn is_current(&self, spec: &Arc<JobSpec>) -> bool {
    self
      .lock()
      .slots
      .get(&spec.id)
      .is_some_and(|slot| Arc::ptr_eq(&slot.spec, spec))
  }

  /// Bookkeeping once a run of `job_id` has released `flag`: start an owed
  /// run, or forget the flag of a job that is gone.
  fn after_run(&self, job_id: &str, flag: &Arc<AtomicBool>) -> Option<Firing> {
    let now = Instant::now();
    let mut state = self.lock();
    if !state.slots.contains_key(job_id) {
      let idle = !flag.load(Ordering::Acquire);
      if idle && state.in_flight.get(job_id).is_some_and(|f| Arc::ptr_eq(f, flag)) {
        state.in_flight.remove(job_id);
      }
      return None;
    }
    if !state.queued.remove(job_id) {
      return None;
    }
    let firing = state.slots.get_mut(job_id).and_then(|slot| slot.fire_now(now));
    if firing.is_some() {
      self.wake.notify_one();
    }
    firing
  }

  fn emit(&self, event: &JobEvent) {
    let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
    for listener in listeners.iter() {
      listener.on_event(event);
    }
  }

  fn pool(&self, pool: WorkerPool) -> Arc<Semaphore> {
    match pool {
      WorkerPool::Default => Arc::clone(&self.default_pool),
      WorkerPool::Heavy => Arc::clone(&self.heavy_pool),
    }
  }

  /// Spawn every due job and return the earliest upcoming firing.
  fn fire_due(self: &Arc<Self>, now: Instant) -> Option<Instant> {
    let mut firings = Vec::new();
    let mut missed = Vec::new();

    let next_due = {
      let mut state = self.lock();
      if state.paused {
        return None;
      }

      for (id, slot) in &mut state.slots {
        let Some(scheduled) = slot.next_run else {
          continue;
        };
        if scheduled > now {
          continue;
        }

        // Coalesce: only the latest overdue firing counts.
        let interval = slot.spec.interval().max(Duration::from_secs(1));
        let overdue = now.duration_since(scheduled);
        let skipped = u32::try_from(overdue.as_nanos() / interval.as_nanos()).unwrap_or(u32::MAX);
        let latest = scheduled + interval * skipped;
        let next_run = latest + interval;
        slot.next_run = Some(next_run);

        if now.duration_since(latest) > self.config.misfire_grace {
          missed.push((id.clone(), MissReason::Misfire));
          continue;
        }
        match RunningGuard::acquire(&slot.running) {
          Some(guard) => firings.push(Firing {
            spec: Arc::clone(&slot.spec),
            scheduled: latest,
            next_run: Some(next_run),
            guard,
            enforce_grace: true,
          }),
          None => missed.push((id.clone(), MissReason::AlreadyRunning)),
        }
      }

      state.slots.values().filter_map(|slot| slot.next_run).min()
    };

    for (job_id, reason) in missed {
      warn!(job = %job_id, reason = reason.as_str(), "Job firing missed");
      self.emit(&JobEvent::Missed { job_id, reason });
    }
    for firing in firings {
      debug!(job = %firing.spec.id, "Job firing");
      tokio::spawn(Self::run(Arc::clone(self), firing));
    }

    next_due
  }

  async fn run(self: Arc<Self>, firing: Firing) {
    let mut next = Some(firing);
    while let Some(firing) = next.take() {
      let spec = Arc::clone(&firing.spec);
      let flag = Arc::clone(&firing.guard.0);
      Arc::clone(&self).run_once(firing).await;
      next = self.after_run(&spec.id, &flag);
      if next.is_some() {
        debug!(job = %spec.id, "Owed job run starting");
      }
    }
  }

  async fn run_once(self: Arc<Self>, firing: Firing) {
    let Firing {
      spec,
      scheduled,
      next_run,
      guard,
      enforce_grace,
    } = firing;

    let Ok(_permit) = self.pool(spec.category.pool()).acquire_owned().await else {
      return;
    };

    if enforce_grace && Instant::now().duration_since(scheduled) > self.config.misfire_grace {
      drop(guard);
      warn!(job = %spec.id, "Job could not start within the misfire grace window");
      self.emit(&JobEvent::Missed {
        job_id: spec.id.clone(),
        reason: MissReason::Misfire,
      });
      return;
    }

    let is_current = || self.is_current(&spec);
    let outcome = self.supervisor.execute_while(&spec, next_run, &is_current).await;
    drop(guard);

    if self.config.suspend_on_failure && !outcome.is_success() {
      let mut state = self.lock();
      if let Some(slot) = state.slots.get_mut(&spec.id).filter(|slot| Arc::ptr_eq(&slot.spec, &spec)) {
        slot.next_run = None;
        warn!(job = %spec.id, "Job suspended after failure");
      }
    }

    self.emit(&JobEvent::Executed(outcome));
  }
}

async fn sleep_until_due(due: Option<Instant>) {
  match due {
    Some(at) => tokio::time::sleep_until(at).await,
    None => std::future::pending().await,
  }
}

fn wall_clock(at: Instant, now: Instant) -> DateTime<Utc> {
  let wall = Utc::now();
  if at >= now {
    chrono::Duration::from_std(at - now).map_or(wall, |d| wall + d)
  } else {
    chrono::Duration::from_std(now - at).map_or(wall, |d| wall - d)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_running_guard_is_exclusive() {
    let flag = Arc::new(AtomicBool::new(false));
    let guard = RunningGuard::acquire(&flag).unwrap();
    assert!(RunningGuard::acquire(&flag).is_none());
    drop(guard);
    assert!(!flag.load(Ordering::Acquire));
    assert!(RunningGuard::acquire(&flag).is_some());
  }

  #[test]
  fn test_default_config() {
    let config = SchedulerConfig::default();
    assert_eq!(config.misfire_grace, Duration::from_secs(5));
    assert_eq!(config.default_workers, 20);
    assert!(config.heavy_workers >= 1);
  }
}
