//! Source Ports - Vendor Wire Client Interfaces
//!
//! Raw-data interfaces the source adapters consume. Implementations
//! return rows or records exactly as the vendor reports them; all
//! normalization happens in the adapters.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde_json::Value;

use crate::domain::error::CollectError;

/// A single cell returned by a SQL query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
  /// SQL NULL.
  Null,
  /// Boolean column.
  Bool(bool),
  /// Integer column.
  Int(i64),
  /// Floating point or numeric column.
  Float(f64),
  /// Text column (and anything rendered as text).
  Text(String),
  /// Timestamp without timezone.
  Timestamp(NaiveDateTime),
  /// Timestamp with timezone.
  TimestampTz(DateTime<FixedOffset>),
}

impl SqlValue {
  /// Numeric view of the cell, when it has one.
  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
      Self::Int(i) => Some(*i as f64),
      Self::Float(f) => Some(*f),
      Self::Text(s) => s.trim().parse().ok(),
      _ => None,
    }
  }

  /// Label view of the cell. NULL renders as the empty string.
  pub fn to_label(&self) -> String {
    match self {
      Self::Null => String::new(),
      Self::Bool(b) => b.to_string(),
      Self::Int(i) => i.to_string(),
      Self::Float(f) => f.to_string(),
      Self::Text(s) => s.clone(),
      Self::Timestamp(ts) => ts.to_string(),
      Self::TimestampTz(ts) => ts.to_rfc3339(),
    }
  }
}

/// Column names plus rows, in query order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
  /// Column names as reported by the driver.
  pub columns: Vec<String>,
  /// Rows; each row has one cell per column.
  pub rows: Vec<Vec<SqlValue>>,
}

/// A scoped database session. Dropped at the end of a collection.
#[async_trait]
pub trait SqlSession: Send {
  /// Execute `statement` and return every row.
  async fn query(&mut self, statement: &str) -> Result<QueryResult, CollectError>;
}

/// Opens sessions against configured database services.
#[async_trait]
pub trait SqlConnector: Send + Sync + 'static {
  /// Open a session for `service`.
  async fn connect(&self, service: &str) -> Result<Box<dyn SqlSession>, CollectError>;
}

/// Metric-tree query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricTreeQuery {
  /// Application name.
  pub application: String,
  /// Metric path, possibly with wildcards.
  pub metric_path: String,
  /// Rollup window ending now.
  pub duration_minutes: u64,
}

/// One rolled-up value window of a path metric.
#[derive(Debug, Clone, PartialEq)]
pub struct PathMetricValue {
  /// Window start (Unix ms).
  pub start_time_ms: i64,
  /// Numeric fields in vendor order (`value`, `min`, `max`, ...).
  pub fields: Vec<(String, f64)>,
}

/// A metric reported under a `|`-delimited path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathMetric {
  /// Full metric path.
  pub path: String,
  /// Value windows; the first is used.
  pub values: Vec<PathMetricValue>,
}

/// Hierarchical APM metric API.
#[async_trait]
pub trait MetricTreeApi: Send + Sync + 'static {
  /// Fetch rolled-up metric data for `service`.
  async fn metric_data(
    &self,
    service: &str,
    query: &MetricTreeQuery,
  ) -> Result<Vec<PathMetric>, CollectError>;
}

/// Stats query parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsQuery {
  /// Vendor query body, passed through.
  pub params: Value,
  /// Lookback window ending now.
  pub duration_minutes: u64,
}

/// One keyed stat value.
#[derive(Debug, Clone, PartialEq)]
pub struct StatRecord {
  /// Reported metric-name key.
  pub key: String,
  /// Value.
  pub value: f64,
}

/// Grouped stats API.
#[async_trait]
pub trait StatsApi: Send + Sync + 'static {
  /// Fetch stat records for `service`.
  async fn stats(&self, service: &str, query: &StatsQuery) -> Result<Vec<StatRecord>, CollectError>;
}
