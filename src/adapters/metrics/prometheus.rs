//! Process Metrics - Scheduler Self-Instrumentation
//!
//! Registers the exporter's own Prometheus metrics and keeps them in
//! step with scheduler events. Rendered alongside job registries on the
//! aggregate `/metrics` endpoint.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use tracing::debug;

use crate::domain::outcome::{JobEvent, RunStatus};
use crate::ports::events::JobListener;

/// Self-instrumentation for the scheduling engine.
///
/// All metrics follow the naming convention `metric_bridge_*`.
pub struct ProcessMetrics {
    /// Prometheus registry.
    registry: Registry,
    /// Run duration histogram; failed runs observe 0.
    pub job_execution_seconds: HistogramVec,
    /// Failed runs by failure kind.
    pub job_failures: IntCounterVec,
    /// Dropped firings by reason.
    pub job_missed: IntCounterVec,
    /// Failed push attempts by destination.
    pub push_failures: IntCounterVec,
    /// Failed reconciliation ticks.
    pub reconciliation_failures: IntCounter,
    /// Jobs in the live set.
    pub scheduled_jobs: IntGauge,
}

impl ProcessMetrics {
    /// Create and register all process metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let job_execution_seconds = HistogramVec::new(
            HistogramOpts::new(
                "metric_bridge_job_execution_seconds",
                "Job execution time in seconds (0 for failed runs)",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0]),
            &["job", "category"],
        )?;

        let job_failures = IntCounterVec::new(
            Opts::new("metric_bridge_job_failures_total", "Total failed job runs"),
            &["job", "category", "kind"],
        )?;

        let job_missed = IntCounterVec::new(
            Opts::new(
                "metric_bridge_job_missed_total",
                "Total job firings dropped before starting",
            ),
            &["job", "reason"],
        )?;

        let push_failures = IntCounterVec::new(
            Opts::new(
                "metric_bridge_push_failures_total",
                "Total failed snapshot deliveries",
            ),
            &["job", "destination"],
        )?;

        let reconciliation_failures = IntCounter::new(
            "metric_bridge_reconciliation_failures_total",
            "Total failed reconciliation ticks",
        )?;

        let scheduled_jobs = IntGauge::new(
            "metric_bridge_scheduled_jobs",
            "Number of jobs in the live set",
        )?;

        // Register all metrics
        registry.register(Box::new(job_execution_seconds.clone()))?;
        registry.register(Box::new(job_failures.clone()))?;
        registry.register(Box::new(job_missed.clone()))?;
        registry.register(Box::new(push_failures.clone()))?;
        registry.register(Box::new(reconciliation_failures.clone()))?;
        registry.register(Box::new(scheduled_jobs.clone()))?;

        Ok(Self {
            registry,
            job_execution_seconds,
            job_failures,
            job_missed,
            push_failures,
            reconciliation_failures,
            scheduled_jobs,
        })
    }

    /// Handle to the underlying registry, for aggregate rendering.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }
}

impl JobListener for ProcessMetrics {
    fn on_event(&self, event: &JobEvent) {
        match event {
            JobEvent::Executed(outcome) => {
                let category = outcome.category.as_str();
                let seconds = match outcome.status {
                    RunStatus::Completed { .. } => outcome.duration.as_secs_f64(),
                    _ => 0.0,
                };
                self.job_execution_seconds
                    .with_label_values(&[&outcome.job_id, category])
                    .observe(seconds);

                if let Some(kind) = outcome.status.failure_kind() {
                    self.job_failures
                        .with_label_values(&[&outcome.job_id, category, kind.as_str()])
                        .inc();
                }
                for destination in &outcome.push_failures {
                    self.push_failures
                        .with_label_values(&[&outcome.job_id, destination])
                        .inc();
                }
            }
            JobEvent::Missed { job_id, reason } => {
                self.job_missed
                    .with_label_values(&[job_id, reason.as_str()])
                    .inc();
            }
            JobEvent::JobSetChanged { job_count } => {
                self.scheduled_jobs
                    .set(i64::try_from(*job_count).unwrap_or(i64::MAX));
            }
            JobEvent::ReconciliationFailed { .. } => self.reconciliation_failures.inc(),
        }
        debug!(?event, "Process metrics updated");
    }
}
