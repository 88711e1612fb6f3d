//! AppDynamics Metric-Data Client
//!
//! Implements `MetricTreeApi` over the controller REST endpoint
//! `GET /controller/rest/applications/{app}/metric-data`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use tracing::{debug, instrument};

use super::client::ApiClient;
use super::types::AppDynamicsMetric;
use crate::domain::error::CollectError;
use crate::ports::sources::{MetricTreeApi, MetricTreeQuery, PathMetric};

/// Metric-tree client for AppDynamics controllers.
pub struct AppDynamicsClient {
  client: Arc<ApiClient>,
}

impl AppDynamicsClient {
  /// Create a client over `client`.
  pub fn new(client: Arc<ApiClient>) -> Self {
    Self { client }
  }
}

#[async_trait]
impl MetricTreeApi for AppDynamicsClient {
  #[instrument(skip(self, query), fields(application = %query.application))]
  async fn metric_data(&self, service: &str, query: &MetricTreeQuery) -> Result<Vec<PathMetric>, CollectError> {
    let url = self.client.url(
      service,
      &["controller", "rest", "applications", &query.application, "metric-data"],
    )?;
    let duration = query.duration_minutes.to_string();
    let request = self.client.request(service, Method::GET, url)?.query(&[
      ("metric-path", query.metric_path.as_str()),
      ("time-range-type", "BEFORE_NOW"),
      ("duration-in-mins", duration.as_str()),
      ("rollup", "true"),
      ("output", "JSON"),
    ]);

    let metrics: Vec<AppDynamicsMetric> = self.client.execute(service, request).await?;
    debug!(service, count = metrics.len(), "Metric data received");

    Ok(metrics.into_iter().map(AppDynamicsMetric::into_path_metric).collect())
  }
}
