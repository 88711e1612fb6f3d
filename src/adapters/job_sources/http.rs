//! HTTP Job Source - JSON documents over HTTP
//!
//! `GET`s the definitions (and optional templates) document on every
//! fetch, with an optional bearer token.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::domain::error::JobSourceError;
use crate::ports::job_source::{JobDefinition, JobSource};

use super::{parse_definitions, parse_templates};

/// Job definitions served over HTTP.
pub struct HttpJobSource {
    http: Client,
    url: String,
    templates_url: Option<String>,
    token: Option<String>,
}

impl HttpJobSource {
    /// Source over `url`.
    pub fn new(
        url: &str,
        templates_url: Option<&str>,
        token: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Url::parse(url).with_context(|| format!("Invalid job source URL '{url}'"))?;
        if let Some(templates_url) = templates_url {
            Url::parse(templates_url)
                .with_context(|| format!("Invalid job templates URL '{templates_url}'"))?;
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            url: url.to_string(),
            templates_url: templates_url.map(str::to_string),
            token,
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, JobSourceError> {
        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| JobSourceError::Unreachable(e.to_string()))?;

        response
            .json::<Value>()
            .await
            .map_err(|e| JobSourceError::InvalidDocument(format!("{url}: {e}")))
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<Vec<JobDefinition>, JobSourceError> {
        let templates = match &self.templates_url {
            Some(url) => parse_templates(self.get_json(url).await?)?,
            None => BTreeMap::new(),
        };
        let definitions = parse_definitions(self.get_json(&self.url).await?, &templates)?;
        debug!(count = definitions.len(), "Job definitions fetched");
        Ok(definitions)
    }
}
