//! Metric Registry Manager - Per-Job Prometheus Registries
//!
//! Every job owns a `prometheus::Registry` holding a single custom
//! collector over the job's current snapshot. Snapshots are swapped
//! atomically on each successful run. With a shard directory configured,
//! snapshots are mirrored to disk so that every process renders the
//! union of all processes' series.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::Registry;
use tracing::{debug, warn};

use super::exposition;
use super::shard::ShardStore;
use crate::domain::error::RegistryError;
use crate::domain::metric::MetricSet;
use crate::ports::registry::MetricStore;

/// Shared per-job state read by the collector.
#[derive(Debug)]
struct JobState {
    job_id: String,
    snapshot: RwLock<Arc<MetricSet>>,
    instance: OnceLock<String>,
    shards: Option<ShardStore>,
}

impl JobState {
    fn current(&self) -> Arc<MetricSet> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Collector rendering a job's snapshot (plus other processes' shards)
/// as timestamped gauge families.
struct JobCollector {
    state: Arc<JobState>,
}

impl Collector for JobCollector {
    fn desc(&self) -> Vec<&Desc> {
        Vec::new()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let local = exposition::families(&self.state.current(), true);
        match &self.state.shards {
            Some(shards) => {
                let others = shards
                    .read_others(&self.state.job_id)
                    .into_iter()
                    .map(|set| exposition::families(&set, true));
                exposition::merge(std::iter::once(local).chain(others))
            }
            None => local,
        }
    }
}

struct JobEntry {
    state: Arc<JobState>,
    registry: Registry,
}

/// Owner of every job registry in the process.
pub struct RegistryManager {
    jobs: RwLock<HashMap<String, Arc<JobEntry>>>,
    /// Process self-instrumentation, appended to aggregate renders.
    process: Option<Registry>,
    shards: Option<ShardStore>,
}

impl RegistryManager {
    /// Single-process manager.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            process: None,
            shards: None,
        }
    }

    /// Include `registry` in aggregate renders.
    pub fn with_process_registry(mut self, registry: Registry) -> Self {
        self.process = Some(registry);
        self
    }

    /// Mirror snapshots into `shards` and merge other processes' shards
    /// into every render.
    pub fn with_shards(mut self, shards: ShardStore) -> Self {
        self.shards = Some(shards);
        self
    }

    fn entry(&self, job_id: &str) -> Option<Arc<JobEntry>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    fn encode(families: &[MetricFamily]) -> Result<String, RegistryError> {
        exposition::encode(families).map_err(|e| RegistryError::Render(e.to_string()))
    }
}

impl Default for RegistryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricStore for RegistryManager {
    fn register(&self, job_id: &str) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(job_id) {
            return;
        }

        let state = Arc::new(JobState {
            job_id: job_id.to_string(),
            snapshot: RwLock::new(Arc::new(MetricSet::new())),
            instance: OnceLock::new(),
            shards: self.shards.clone(),
        });
        let registry = Registry::new();
        // A fresh registry has no collectors, so this cannot collide.
        if let Err(e) = registry.register(Box::new(JobCollector {
            state: Arc::clone(&state),
        })) {
            warn!(job = job_id, error = %e, "Failed to register job collector");
        }

        jobs.insert(job_id.to_string(), Arc::new(JobEntry { state, registry }));
        debug!(job = job_id, "Job registry created");
    }

    fn set_metrics(&self, job_id: &str, metrics: MetricSet) -> Result<Arc<MetricSet>, RegistryError> {
        let entry = self
            .entry(job_id)
            .ok_or_else(|| RegistryError::NotFound(job_id.to_string()))?;

        entry
            .state
            .instance
            .get_or_init(|| metrics.instance().unwrap_or_default().to_string());

        if let Some(shards) = &self.shards {
            if let Err(e) = shards.write(job_id, &metrics) {
                warn!(job = job_id, error = %e, "Failed to write metric shard");
            }
        }

        let snapshot = Arc::new(metrics);
        *entry
            .state
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
        Ok(snapshot)
    }

    fn unregister(&self, job_id: &str) -> Option<String> {
        let entry = self
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id)?;

        if let Some(shards) = &self.shards {
            if let Err(e) = shards.remove(job_id) {
                warn!(job = job_id, error = %e, "Failed to remove metric shard");
            }
        }
        debug!(job = job_id, "Job registry removed");
        Some(entry.state.instance.get().cloned().unwrap_or_default())
    }

    fn instance(&self, job_id: &str) -> Option<String> {
        self.entry(job_id)?.state.instance.get().cloned()
    }

    fn contains(&self, job_id: &str) -> bool {
        self.entry(job_id).is_some()
    }

    fn snapshot(&self, job_id: &str) -> Option<Arc<MetricSet>> {
        Some(self.entry(job_id)?.state.current())
    }

    fn render_job(&self, job_id: &str) -> Result<String, RegistryError> {
        if let Some(entry) = self.entry(job_id) {
            return Self::encode(&entry.registry.gather());
        }

        // Jobs scheduled only in a sibling process.
        let shard_sets = self
            .shards
            .as_ref()
            .map(|shards| shards.read_all(job_id))
            .unwrap_or_default();
        if shard_sets.is_empty() {
            return Err(RegistryError::NotFound(job_id.to_string()));
        }
        Self::encode(&exposition::merge(
            shard_sets.iter().map(|set| exposition::families(set, true)),
        ))
    }

    fn render_aggregate(&self) -> Result<String, RegistryError> {
        let entries: Vec<(String, Arc<JobEntry>)> = {
            let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
            let mut entries: Vec<_> = jobs
                .iter()
                .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries
        };

        let mut sources: Vec<Vec<MetricFamily>> = entries
            .iter()
            .map(|(_, entry)| entry.registry.gather())
            .collect();

        if let Some(shards) = &self.shards {
            for job_id in shards.job_ids() {
                if entries.iter().any(|(id, _)| *id == job_id) {
                    continue;
                }
                sources.extend(
                    shards
                        .read_all(&job_id)
                        .iter()
                        .map(|set| exposition::families(set, true)),
                );
            }
        }

        if let Some(process) = &self.process {
            sources.push(process.gather());
        }

        Self::encode(&exposition::merge(sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metric::{Labels, MetricSample, INSTANCE_LABEL};
    use chrono::Utc;

    fn set(name: &str, instance: Option<&str>, value: f64) -> MetricSet {
        let mut labels = Labels::new();
        if let Some(instance) = instance {
            labels.insert(INSTANCE_LABEL.to_string(), instance.to_string());
        }
        let mut set = MetricSet::new();
        set.insert(MetricSample::new(name, labels, value, Utc::now()));
        set
    }

    #[test]
    fn test_register_is_idempotent() {
        let manager = RegistryManager::new();
        manager.register("job");
        manager.set_metrics("job", set("a.m", None, 1.0)).unwrap();
        manager.register("job");
        assert_eq!(manager.snapshot("job").unwrap().series_count(), 1);
    }

    #[test]
    fn test_set_metrics_unknown_job() {
        let manager = RegistryManager::new();
        assert!(matches!(
            manager.set_metrics("ghost", MetricSet::new()),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_instance_cached_once() {
        let manager = RegistryManager::new();
        manager.register("job");
        assert_eq!(manager.instance("job"), None);

        manager.set_metrics("job", set("a.m", Some("east"), 1.0)).unwrap();
        manager.set_metrics("job", set("a.m", Some("west"), 2.0)).unwrap();

        assert_eq!(manager.instance("job").as_deref(), Some("east"));
        assert_eq!(manager.unregister("job").as_deref(), Some("east"));
        assert!(!manager.contains("job"));
        assert_eq!(manager.unregister("job"), None);
    }

    #[test]
    fn test_instance_empty_without_label() {
        let manager = RegistryManager::new();
        manager.register("job");
        manager.set_metrics("job", set("a.m", None, 1.0)).unwrap();
        assert_eq!(manager.instance("job").as_deref(), Some(""));
    }

    #[test]
    fn test_render_job_replaces_snapshot() {
        let manager = RegistryManager::new();
        manager.register("job");
        manager.set_metrics("job", set("a.old", None, 1.0)).unwrap();
        manager.set_metrics("job", set("a.new", None, 2.0)).unwrap();

        let text = manager.render_job("job").unwrap();
        assert!(text.contains("a_new 2"));
        assert!(!text.contains("a_old"));
        assert!(matches!(manager.render_job("other"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_render_aggregate_includes_process_registry() {
        let process = Registry::new();
        let counter = prometheus::IntCounter::new("bridge_test_total", "test").unwrap();
        process.register(Box::new(counter.clone())).unwrap();
        counter.inc();

        let manager = RegistryManager::new().with_process_registry(process);
        manager.register("one");
        manager.register("two");
        manager.set_metrics("one", set("a.first", None, 1.0)).unwrap();
        manager.set_metrics("two", set("b.second", None, 2.0)).unwrap();

        let text = manager.render_aggregate().unwrap();
        assert!(text.contains("a_first 1"));
        assert!(text.contains("b_second 2"));
        assert!(text.contains("bridge_test_total 1"));
    }

    #[test]
    fn test_shards_merge_across_processes() {
        let dir = tempfile::tempdir().unwrap();
        let first = RegistryManager::new().with_shards(ShardStore::with_pid(dir.path(), 1).unwrap().with_liveness(|_| true));
        let second = RegistryManager::new().with_shards(ShardStore::with_pid(dir.path(), 2).unwrap().with_liveness(|_| true));

        first.register("job");
        second.register("job");
        first.set_metrics("job", set("a.m", Some("east"), 1.0)).unwrap();
        second.set_metrics("job", set("a.m", Some("west"), 2.0)).unwrap();

        let text = first.render_job("job").unwrap();
        assert!(text.contains("instance=\"east\""));
        assert!(text.contains("instance=\"west\""));

        second.register("solo");
        second.set_metrics("solo", set("c.only", None, 3.0)).unwrap();
        assert!(first.render_aggregate().unwrap().contains("c_only 3"));
        assert!(first.render_job("solo").unwrap().contains("c_only 3"));

        second.unregister("solo");
        assert!(matches!(first.render_job("solo"), Err(RegistryError::NotFound(_))));
    }
}
