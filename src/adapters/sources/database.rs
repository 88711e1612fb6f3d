//! Database Collector - SQL Rows to Labeled Samples
//!
//! Runs the job statement against each source service and partitions the
//! result columns into value columns (declared), an optional timestamp
//! column and label columns (everything else).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, instrument};

use super::{apply_static_labels, base_labels};
use crate::domain::error::CollectError;
use crate::domain::job::{Category, CategoryParams, JobSpec};
use crate::domain::metric::{MetricSample, MetricSet};
use crate::domain::normalize::{find_column, format_label, format_metric, missing_fields};
use crate::ports::collector::SourceAdapter;
use crate::ports::sources::{QueryResult, SqlConnector, SqlValue};

/// Collects `database` jobs.
pub struct DatabaseCollector {
    connector: Arc<dyn SqlConnector>,
}

impl DatabaseCollector {
    /// Create a collector over `connector`.
    pub fn new(connector: Arc<dyn SqlConnector>) -> Self {
        Self { connector }
    }
}

/// Column positions resolved from the first result.
struct Layout {
    values: Vec<(usize, String)>,
    labels: Vec<(usize, String)>,
    timestamp: Option<usize>,
}

impl Layout {
    fn resolve(
        job: &JobSpec,
        prefix: &str,
        result: &QueryResult,
        value_columns: &[String],
        timestamp_column: Option<&str>,
    ) -> Result<Self, CollectError> {
        let mut wanted: Vec<&str> = value_columns.iter().map(String::as_str).collect();
        wanted.extend(timestamp_column);
        let missing = missing_fields(&result.columns, &wanted);
        if !missing.is_empty() {
            return Err(CollectError::MissingFields {
                job: job.id.clone(),
                fields: missing.join(", "),
            });
        }

        let mut values = Vec::with_capacity(value_columns.len());
        for column in value_columns {
            if let Some(idx) = find_column(&result.columns, column) {
                values.push((idx, format!("{prefix}.{}", format_metric(column))));
            }
        }
        let timestamp = timestamp_column.and_then(|c| find_column(&result.columns, c));

        let labels = result
            .columns
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != timestamp && values.iter().all(|(v, _)| v != idx))
            .map(|(idx, column)| (idx, format_label(column)))
            .collect();

        Ok(Self {
            values,
            labels,
            timestamp,
        })
    }
}

/// Row timestamp: naive values are localized in the source timezone,
/// zoned values are converted directly.
fn row_timestamp(cell: &SqlValue, timezone: Tz) -> Option<DateTime<Utc>> {
    match cell {
        SqlValue::Timestamp(naive) => timezone
            .from_local_datetime(naive)
            .earliest()
            .map(|ts| ts.with_timezone(&Utc)),
        SqlValue::TimestampTz(ts) => Some(ts.with_timezone(&Utc)),
        _ => None,
    }
}

#[async_trait]
impl SourceAdapter for DatabaseCollector {
    fn category(&self) -> Category {
        Category::Database
    }

    #[instrument(skip(self, job), fields(job = %job.id))]
    async fn collect(&self, job: &JobSpec) -> Result<MetricSet, CollectError> {
        let CategoryParams::Database {
            statement,
            value_columns,
            timestamp_column,
        } = &job.params
        else {
            return Err(CollectError::CategoryMismatch {
                job: job.id.clone(),
                category: Category::Database.to_string(),
            });
        };

        let mut set = MetricSet::new();

        for source in &job.sources {
            let result = {
                let mut session = self.connector.connect(&source.name).await?;
                session.query(statement).await?
            };
            let now = Utc::now();

            if result.rows.is_empty() {
                debug!(service = %source.name, "Query returned no rows");
                continue;
            }

            let layout = Layout::resolve(
                job,
                &source.prefix,
                &result,
                value_columns,
                timestamp_column.as_deref(),
            )?;

            for row in &result.rows {
                let mut labels = base_labels(job, source);
                for (idx, key) in &layout.labels {
                    let value = row.get(*idx).map(SqlValue::to_label).unwrap_or_default();
                    labels.insert(key.clone(), value);
                }
                apply_static_labels(job, &mut labels);

                let timestamp = layout
                    .timestamp
                    .and_then(|idx| row.get(idx))
                    .and_then(|cell| row_timestamp(cell, source.timezone))
                    .unwrap_or(now);

                for (idx, name) in &layout.values {
                    let Some(value) = row.get(*idx).and_then(SqlValue::as_f64) else {
                        debug!(metric = %name, "Skipping non-numeric value");
                        continue;
                    };
                    set.insert(MetricSample::new(name.clone(), labels.clone(), value, timestamp));
                }
            }
        }

        set.normalize_schema();
        Ok(set)
    }
}
