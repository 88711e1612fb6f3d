//! ExtraHop Metrics Client
//!
//! Implements `StatsApi` over `POST /api/v1/metrics`. The job's metric
//! parameters are sent as-is with the lookback window added.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::client::ApiClient;
use super::types::ExtraHopMetrics;
use crate::domain::error::CollectError;
use crate::ports::sources::{StatRecord, StatsApi, StatsQuery};

/// Stats client for ExtraHop appliances.
pub struct ExtraHopClient {
  client: Arc<ApiClient>,
}

impl ExtraHopClient {
  /// Create a client over `client`.
  pub fn new(client: Arc<ApiClient>) -> Self {
    Self { client }
  }
}

/// Request body: the job parameters plus `from`/`until`.
fn request_body(query: &StatsQuery) -> Value {
  let mut body = match &query.params {
    Value::Object(map) => map.clone(),
    _ => serde_json::Map::new(),
  };
  body.insert("from".to_string(), json!(format!("-{}m", query.duration_minutes)));
  body.insert("until".to_string(), json!(0));
  Value::Object(body)
}

#[async_trait]
impl StatsApi for ExtraHopClient {
  #[instrument(skip(self, query))]
  async fn stats(&self, service: &str, query: &StatsQuery) -> Result<Vec<StatRecord>, CollectError> {
    let url = self.client.url(service, &["api", "v1", "metrics"])?;
    let request = self
      .client
      .request(service, Method::POST, url)?
      .json(&request_body(query));

    let metrics: ExtraHopMetrics = self.client.execute(service, request).await?;
    let records = metrics.into_records();
    debug!(service, count = records.len(), "Stats received");
    Ok(records)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_request_body_adds_window() {
    let query = StatsQuery {
      params: json!({"metric_category": "http_server", "object_type": "device"}),
      duration_minutes: 30,
    };
    let body = request_body(&query);
    assert_eq!(body["from"], "-30m");
    assert_eq!(body["until"], 0);
    assert_eq!(body["metric_category"], "http_server");
  }
}
