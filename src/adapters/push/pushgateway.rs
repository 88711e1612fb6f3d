//! Pushgateway Destination - Grouping-key PUT/DELETE
//!
//! Replaces a job's group with `PUT {base}/metrics/job/<job>[/instance/<inst>]`
//! and removes it with `DELETE` on the same path. Bodies are text
//! exposition without sample timestamps. Grouping-key values that are
//! empty or contain `/` use the `<label>@base64/<value>` form.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use reqwest::{Client, RequestBuilder, Response, Url};
use tracing::{debug, instrument};

use crate::adapters::metrics::exposition;
use crate::domain::error::PushError;
use crate::domain::metric::MetricSet;
use crate::ports::push::{GroupingKey, PushDestination, PushMode};

use super::{EXPOSITION_CONTENT_TYPE, PushCredentials};

/// A Prometheus Pushgateway.
pub struct Pushgateway {
    /// Configured destination name.
    name: String,
    /// Base URL.
    base_url: Url,
    /// Optional basic auth.
    credentials: Option<PushCredentials>,
    /// Underlying HTTP client.
    http: Client,
}

impl Pushgateway {
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

    /// Group URL for `key`.
    pub fn group_url(&self, key: &GroupingKey) -> Result<Url, PushError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| PushError::Transport {
                destination: self.name.clone(),
                message: format!("base URL '{}' cannot carry a path", self.base_url),
            })?;
            segments.pop_if_empty().push("metrics");
            for (label, value) in key.pairs() {
                let (label, value) = encode_pair(label, value);
                segments.push(&label).push(&value);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(creds) => request.basic_auth(&creds.username, creds.password.as_deref()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<(), PushError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| PushError::Transport {
                destination: self.name.clone(),
                message: e.to_string(),
            })?;
        check_status(&self.name, response).await
    }
}

#[async_trait]
impl PushDestination for Pushgateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> PushMode {
        PushMode::Gateway
    }

    #[instrument(skip(self, metrics), fields(destination = %self.name, key = %key))]
    async fn push(&self, key: &GroupingKey, metrics: &MetricSet) -> Result<(), PushError> {
        let body = exposition::render(metrics, false).map_err(|e| PushError::Encode(e.to_string()))?;
        let url = self.group_url(key)?;
        debug!(url = %url, series = metrics.series_count(), "Pushing to gateway");

        let request = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)
            .body(body);
        self.send(request).await
    }

    #[instrument(skip(self), fields(destination = %self.name, key = %key))]
    async fn delete(&self, key: &GroupingKey) -> Result<(), PushError> {
        let url = self.group_url(key)?;
        debug!(url = %url, "Deleting gateway group");
        self.send(self.http.delete(url)).await
    }
}

/// `(label, value)` path segments, switching to base64 when the value
/// cannot be carried verbatim.
fn encode_pair(label: &str, value: &str) -> (String, String) {
    if value.is_empty() {
        (format!("{label}@base64"), "=".to_string())
    } else if value.contains('/') {
        (format!("{label}@base64"), URL_SAFE.encode(value))
    } else {
        (label.to_string(), value.to_string())
    }
}

pub(super) async fn check_status(destination: &str, response: Response) -> Result<(), PushError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(PushError::Rejected {
        destination: destination.to_string(),
        status: status.as_u16(),
        body,
    })
}
