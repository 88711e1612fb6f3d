//! Metric Tree Collector - Hierarchical APM Paths to Labeled Samples
//!
//! Each reported path is decomposed into labels and a profile; every
//! numeric field of the first rollup window becomes its own metric,
//! timestamped at the end of the window.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::{apply_static_labels, base_labels};
use crate::domain::error::CollectError;
use crate::domain::job::{Category, CategoryParams, JobSpec};
use crate::domain::metric::{MetricSample, MetricSet};
use crate::domain::metric_path::decompose;
use crate::domain::normalize::format_metric;
use crate::ports::collector::SourceAdapter;
use crate::ports::sources::{MetricTreeApi, MetricTreeQuery};

/// Collects `appdynamics` jobs.
pub struct MetricTreeCollector {
    api: Arc<dyn MetricTreeApi>,
}

impl MetricTreeCollector {
    /// Create a collector over `api`.
    pub fn new(api: Arc<dyn MetricTreeApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SourceAdapter for MetricTreeCollector {
    fn category(&self) -> Category {
        Category::AppDynamics
    }

    #[instrument(skip(self, job), fields(job = %job.id))]
    async fn collect(&self, job: &JobSpec) -> Result<MetricSet, CollectError> {
        let CategoryParams::MetricTree {
            application,
            metric_path,
            duration_minutes,
        } = &job.params
        else {
            return Err(CollectError::CategoryMismatch {
                job: job.id.clone(),
                category: Category::AppDynamics.to_string(),
            });
        };

        let query = MetricTreeQuery {
            application: application.clone(),
            metric_path: metric_path.clone(),
            duration_minutes: *duration_minutes,
        };
        let window_ms = i64::try_from(*duration_minutes)
            .unwrap_or(i64::MAX / 60_000)
            .saturating_mul(60_000);

        let mut set = MetricSet::new();

        for source in &job.sources {
            let metrics = self.api.metric_data(&source.name, &query).await?;

            for metric in &metrics {
                let Some(window) = metric.values.first() else {
                    debug!(path = %metric.path, "Metric has no values");
                    continue;
                };

                let path = decompose(application, &metric.path);
                let mut labels = base_labels(job, source);
                labels.extend(path.labels);
                apply_static_labels(job, &mut labels);

                let timestamp =
                    DateTime::from_timestamp_millis(window.start_time_ms.saturating_add(window_ms))
                        .unwrap_or_else(Utc::now);

                for (field, value) in &window.fields {
                    let name = format!("{}.{}_{}", source.prefix, path.profile, format_metric(field));
                    set.insert(MetricSample::new(name, labels.clone(), *value, timestamp));
                }
            }
        }

        set.normalize_schema();
        Ok(set)
    }
}
