//! Stats Collector - Grouped Aggregation of Keyed Records
//!
//! Groups raw records by their reported metric-name key, filters values
//! through the optional threshold and emits one metric per configured
//! function.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::instrument;

use super::{apply_static_labels, base_labels};
use crate::domain::error::CollectError;
use crate::domain::job::{Category, CategoryParams, JobSpec};
use crate::domain::metric::{MetricSample, MetricSet};
use crate::domain::normalize::format_metric;
use crate::ports::collector::SourceAdapter;
use crate::ports::sources::{StatsApi, StatsQuery};

/// Label carrying the lower-cased group key.
pub const METRIC_SPEC_LABEL: &str = "metric_spec_name";

/// Collects `extrahop` jobs.
pub struct StatsCollector {
    api: Arc<dyn StatsApi>,
}

impl StatsCollector {
    /// Create a collector over `api`.
    pub fn new(api: Arc<dyn StatsApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SourceAdapter for StatsCollector {
    fn category(&self) -> Category {
        Category::ExtraHop
    }

    #[instrument(skip(self, job), fields(job = %job.id))]
    async fn collect(&self, job: &JobSpec) -> Result<MetricSet, CollectError> {
        let CategoryParams::Stats {
            metric_params,
            metric_name,
            aggregation,
            duration_minutes,
        } = &job.params
        else {
            return Err(CollectError::CategoryMismatch {
                job: job.id.clone(),
                category: Category::ExtraHop.to_string(),
            });
        };

        let query = StatsQuery {
            params: metric_params.clone(),
            duration_minutes: *duration_minutes,
        };
        let metric = format_metric(metric_name);

        let mut set = MetricSet::new();

        for source in &job.sources {
            let records = self.api.stats(&source.name, &query).await?;
            let timestamp = Utc::now();

            // Groups exist even when every value is filtered out.
            let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
            for record in records {
                let group = groups.entry(record.key).or_default();
                if aggregation.accepts(record.value) {
                    group.push(record.value);
                }
            }

            for (key, values) in &groups {
                let mut labels = base_labels(job, source);
                labels.insert(METRIC_SPEC_LABEL.to_string(), key.to_lowercase());
                apply_static_labels(job, &mut labels);

                for func in &aggregation.funcs {
                    let Some(value) = func.apply(values) else {
                        continue;
                    };
                    let name = format!("{}.{}_{}", source.prefix, metric, func.suffix());
                    set.insert(MetricSample::new(name, labels.clone(), value, timestamp));
                }
            }
        }

        set.normalize_schema();
        Ok(set)
    }
}
