//! Metric Model - Samples, Label Sets and Per-Run Metric Sets
//!
//! A `MetricSet` is the complete output of one collection run: metric
//! name → serialized label set → sample. It is built fresh each run and
//! swapped into the registry as a whole.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label key → value. Ordered so the serialized form is canonical.
pub type Labels = BTreeMap<String, String>;

/// Label key under which a source's instance is carried.
pub const INSTANCE_LABEL: &str = "instance";

/// A single labeled observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Canonical metric name (`<prefix>.<metric>`).
    pub name: String,
    /// Label set.
    pub labels: Labels,
    /// Observed value.
    pub value: f64,
    /// Observation time.
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// Create a sample.
    pub fn new(
        name: impl Into<String>,
        labels: Labels,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            labels,
            value,
            timestamp,
        }
    }

    /// Serialized label set used as the collision key within a metric.
    pub fn label_key(&self) -> String {
        label_key(&self.labels)
    }
}

/// Canonical JSON encoding of a label set.
pub fn label_key(labels: &Labels) -> String {
    serde_json::to_string(labels).unwrap_or_default()
}

/// A sample with its insertion sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Entry {
    seq: u64,
    sample: MetricSample,
}

/// All samples collected by one run, grouped by metric name.
///
/// Every accepted sample keeps its insertion sequence number, so
/// first-wins decisions follow collection order rather than label order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    metrics: BTreeMap<String, BTreeMap<String, Entry>>,
    #[serde(default)]
    next_seq: u64,
}

impl MetricSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sample. Returns `false` (and drops the sample) when a
    /// sample with the same name and label set is already present.
    pub fn insert(&mut self, sample: MetricSample) -> bool {
        let key = sample.label_key();
        let family = self.metrics.entry(sample.name.clone()).or_default();
        if family.contains_key(&key) {
            return false;
        }
        family.insert(
            key,
            Entry {
                seq: self.next_seq,
                sample,
            },
        );
        self.next_seq += 1;
        true
    }

    /// Total number of series across all metric names.
    pub fn series_count(&self) -> usize {
        self.metrics.values().map(BTreeMap::len).sum()
    }

    /// Whether the set holds no samples.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Metric names in canonical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    /// Samples of one metric, ordered by label key.
    pub fn family(&self, name: &str) -> impl Iterator<Item = &MetricSample> {
        self.metrics
            .get(name)
            .into_iter()
            .flat_map(|family| family.values().map(|e| &e.sample))
    }

    /// Every sample, grouped by metric name.
    pub fn samples(&self) -> impl Iterator<Item = &MetricSample> {
        self.metrics
            .values()
            .flat_map(|family| family.values().map(|e| &e.sample))
    }

    /// Look up one series.
    pub fn get(&self, name: &str, labels: &Labels) -> Option<&MetricSample> {
        self.metrics
            .get(name)?
            .get(&label_key(labels))
            .map(|e| &e.sample)
    }

    /// The earliest-inserted sample still in the set.
    pub fn first_sample(&self) -> Option<&MetricSample> {
        self.metrics
            .values()
            .flat_map(BTreeMap::values)
            .min_by_key(|e| e.seq)
            .map(|e| &e.sample)
    }

    /// Instance label carried by the first sample, if any.
    pub fn instance(&self) -> Option<&str> {
        self.first_sample()?
            .labels
            .get(INSTANCE_LABEL)
            .map(String::as_str)
    }

    /// Union of label keys used by a metric.
    pub fn label_keys(&self, name: &str) -> BTreeSet<String> {
        self.family(name)
            .flat_map(|s| s.labels.keys().cloned())
            .collect()
    }

    /// Pad every sample with `""` for label keys other samples of the same
    /// metric carry, so each metric has a single label schema.
    ///
    /// Samples that become identical after padding collapse first-wins,
    /// in insertion order.
    pub fn normalize_schema(&mut self) {
        for family in self.metrics.values_mut() {
            let keys: BTreeSet<String> = family
                .values()
                .flat_map(|e| e.sample.labels.keys().cloned())
                .collect();
            if family.values().all(|e| e.sample.labels.len() == keys.len()) {
                continue;
            }

            let mut entries: Vec<Entry> = std::mem::take(family).into_values().collect();
            entries.sort_by_key(|e| e.seq);

            for mut entry in entries {
                for key in &keys {
                    entry.sample.labels.entry(key.clone()).or_default();
                }
                family.entry(entry.sample.label_key()).or_insert(entry);
            }
        }
    }

    /// Add every series of `other` not already present here.
    pub fn merge_first_wins(&mut self, other: &Self) {
        let mut entries: Vec<&Entry> = other.metrics.values().flat_map(BTreeMap::values).collect();
        entries.sort_by_key(|e| e.seq);
        for entry in entries {
            self.insert(entry.sample.clone());
        }
    }
}
