//! Timestamped Import Destination
//!
//! Bridges to TSDBs with a Prometheus text import endpoint
//! (VictoriaMetrics style). Samples keep their collection timestamps and
//! the grouping key is attached as `extra_label` query parameters:
//!
//! - push:   `POST {base}/api/v1/import/prometheus?extra_label=job=<job>`
//! - delete: `POST {base}/api/v1/admin/tsdb/delete_series?match[]={job="<job>"}`

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use tracing::{debug, instrument};

use crate::adapters::metrics::exposition;
use crate::domain::error::PushError;
use crate::domain::metric::MetricSet;
use crate::ports::push::{GroupingKey, PushDestination, PushMode};

use super::pushgateway::check_status;
use super::{EXPOSITION_CONTENT_TYPE, PushCredentials};

const IMPORT_PATH: &[&str] = &["api", "v1", "import", "prometheus"];
const DELETE_PATH: &[&str] = &["api", "v1", "admin", "tsdb", "delete_series"];

/// A timestamp-preserving import endpoint.
pub struct ImportBridge {
    name: String,
    base_url: Url,
    credentials: Option<PushCredentials>,
    http: Client,
}

impl ImportBridge {
    /// Create a destination for `base_url`.
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        credentials: Option<PushCredentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let name = name.into();
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid URL for push service '{name}'"))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            name,
            base_url,
            credentials,
            http,
        })
    }

    /// Import URL carrying `key` as extra labels.
    pub fn import_url(&self, key: &GroupingKey) -> Result<Url, PushError> {
        let mut url = self.endpoint(IMPORT_PATH)?;
        {
            let mut query = url.query_pairs_mut();
            for (label, value) in key.pairs() {
                query.append_pair("extra_label", &format!("{label}={value}"));
            }
        }
        Ok(url)
    }

    /// Delete URL matching every series under `key`.
    pub fn delete_url(&self, key: &GroupingKey) -> Result<Url, PushError> {
        let mut url = self.endpoint(DELETE_PATH)?;
        url.query_pairs_mut().append_pair("match[]", &series_selector(key));
        Ok(url)
    }

    fn endpoint(&self, path: &[&str]) -> Result<Url, PushError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| PushError::Transport {
                destination: self.name.clone(),
                message: format!("base URL '{}' cannot carry a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(path);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<(), PushError> {
        let request = match &self.credentials {
            Some(creds) => request.basic_auth(&creds.username, creds.password.as_deref()),
            None => request,
        };
        let response = request.send().await.map_err(|e| PushError::Transport {
            destination: self.name.clone(),
            message: e.to_string(),
        })?;
        check_status(&self.name, response).await
    }
}

#[async_trait]
impl PushDestination for ImportBridge {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> PushMode {
        PushMode::Timestamped
    }

    #[instrument(skip(self, metrics), fields(destination = %self.name, key = %key))]
    async fn push(&self, key: &GroupingKey, metrics: &MetricSet) -> Result<(), PushError> {
        let body = exposition::render(metrics, true).map_err(|e| PushError::Encode(e.to_string()))?;
        let url = self.import_url(key)?;
        debug!(series = metrics.series_count(), "Importing timestamped samples");

        let request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)
            .body(body);
        self.send(request).await
    }

    #[instrument(skip(self), fields(destination = %self.name, key = %key))]
    async fn delete(&self, key: &GroupingKey) -> Result<(), PushError> {
        let url = self.delete_url(key)?;
        self.send(self.http.post(url)).await
    }
}

/// `{job="...",instance="..."}` with quotes and backslashes escaped.
fn series_selector(key: &GroupingKey) -> String {
    let matchers: Vec<String> = key
        .pairs()
        .into_iter()
        .map(|(label, value)| {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            format!("{label}=\"{escaped}\"")
        })
        .collect();
    format!("{{{}}}", matchers.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> ImportBridge {
        ImportBridge::new("vm", "http://victoria:8428", None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_import_url_carries_extra_labels() {
        let url = bridge().import_url(&GroupingKey::new("db_query", "east")).unwrap();
        assert_eq!(url.path(), "/api/v1/import/prometheus");
        let labels: Vec<String> = url
            .query_pairs()
            .filter(|(k, _)| k == "extra_label")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(labels, vec!["job=db_query", "instance=east"]);
    }

    #[test]
    fn test_delete_selector() {
        let key = GroupingKey::new("db_query", "");
        assert_eq!(series_selector(&key), "{job=\"db_query\"}");

        let url = bridge().delete_url(&key).unwrap();
        assert_eq!(url.path(), "/api/v1/admin/tsdb/delete_series");
        let (name, value) = url.query_pairs().next().unwrap();
        assert_eq!(name, "match[]");
        assert_eq!(value, "{job=\"db_query\"}");
    }

    #[test]
    fn test_selector_escapes_quotes() {
        let key = GroupingKey::new("a\"b", "");
        assert_eq!(series_selector(&key), "{job=\"a\\\"b\"}");
    }

    #[test]
    fn test_mode_is_timestamped() {
        assert_eq!(bridge().mode(), PushMode::Timestamped);
    }
}
