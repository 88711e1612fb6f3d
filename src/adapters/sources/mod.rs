//! Source Adapters - Per-Category Collection
//!
//! Implements `SourceAdapter` for each category on top of the raw wire
//! client ports.

pub mod database;
pub mod metric_tree;
pub mod stats;

use crate::domain::job::{JobSpec, SourceRef};
use crate::domain::metric::{INSTANCE_LABEL, Labels};

pub use database::DatabaseCollector;
pub use metric_tree::MetricTreeCollector;
pub use stats::StatsCollector;

/// Base label set shared by every sample a source produces: the source
/// instance when the job pushes anywhere.
pub(crate) fn base_labels(job: &JobSpec, source: &SourceRef) -> Labels {
    let mut labels = Labels::new();
    if job.pushes() {
        if let Some(instance) = &source.instance {
            labels.insert(INSTANCE_LABEL.to_string(), instance.clone());
        }
    }
    labels
}

/// Add static labels whose keys are not already present.
pub(crate) fn apply_static_labels(job: &JobSpec, labels: &mut Labels) {
    for (key, value) in &job.static_labels {
        labels.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono_tz::Tz;

    use crate::domain::job::{Category, CategoryParams, JobOrigin, JobSpec, SourceRef};
    use crate::domain::normalize::service_metric_info;

    pub fn source(name: &str) -> SourceRef {
        let (prefix, instance) = service_metric_info(name);
        SourceRef {
            name: name.to_string(),
            prefix,
            instance,
            timezone: Tz::UTC,
        }
    }

    pub fn job(category: Category, params: CategoryParams, sources: &[&str]) -> JobSpec {
        JobSpec {
            id: "job".to_string(),
            category,
            sources: sources.iter().map(|s| source(s)).collect(),
            push: Vec::new(),
            interval_minutes: 1,
            params,
            static_labels: Vec::new(),
            origin: JobOrigin::Local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{Category, CategoryParams};

    #[test]
    fn test_instance_label_only_when_pushing() {
        let params = CategoryParams::Database {
            statement: String::new(),
            value_columns: Vec::new(),
            timestamp_column: None,
        };
        let mut job = fixtures::job(Category::Database, params, &["Warehouse[east]"]);
        assert!(base_labels(&job, &job.sources[0]).is_empty());

        job.push = vec!["gateway".to_string()];
        let labels = base_labels(&job, &job.sources[0]);
        assert_eq!(labels.get(INSTANCE_LABEL).map(String::as_str), Some("east"));
    }

    #[test]
    fn test_static_labels_do_not_override() {
        let params = CategoryParams::Database {
            statement: String::new(),
            value_columns: Vec::new(),
            timestamp_column: None,
        };
        let mut job = fixtures::job(Category::Database, params, &["db"]);
        job.static_labels = vec![
            ("env".to_string(), "prod".to_string()),
            ("region".to_string(), "static".to_string()),
        ];
        let mut labels = Labels::new();
        labels.insert("region".to_string(), "row".to_string());
        apply_static_labels(&job, &mut labels);
        assert_eq!(labels["region"], "row");
        assert_eq!(labels["env"], "prod");
    }
}
