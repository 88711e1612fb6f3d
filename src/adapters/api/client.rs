//! Vendor HTTP Client - Concurrency-limited REST Client
//!
//! Wraps reqwest with per-service endpoints, credentials and a
//! concurrency limit shared by every request to one vendor. Requests are
//! never retried: a failed call fails the collection run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::domain::error::CollectError;

/// Credentials attached to every request for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceAuth {
  /// No credentials.
  None,
  /// HTTP basic auth.
  Basic {
    /// User name (AppDynamics: `user@account`).
    username: String,
    /// Password.
    password: Option<String>,
  },
  /// `Authorization: ExtraHop apikey=<key>`.
  ExtraHopKey(String),
}

/// Base URL plus credentials for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
  /// Base URL, e.g. `https://controller.example.com`.
  pub base_url: String,
  /// Credentials.
  pub auth: ServiceAuth,
}

/// Configuration for a vendor client.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
  /// Request timeout.
  pub timeout: Duration,
  /// Maximum concurrent requests.
  pub max_concurrent: usize,
}

impl Default for ApiClientConfig {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
      max_concurrent: 10,
    }
  }
}

/// Concurrency-limited HTTP client over a set of named services.
pub struct ApiClient {
  /// Underlying HTTP client.
  http: Client,
  /// Service name → endpoint.
  endpoints: HashMap<String, ServiceEndpoint>,
  /// Concurrency limiter.
  semaphore: Arc<Semaphore>,
}

impl ApiClient {
  /// Create a client for `endpoints`.
  pub fn new(endpoints: HashMap<String, ServiceEndpoint>, config: &ApiClientConfig) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(5)
      .build()
      .context("Failed to build HTTP client")?;

    Ok(Self {
      http,
      endpoints,
      semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
    })
  }

  /// Whether `service` is configured.
  pub fn has_service(&self, service: &str) -> bool {
    self.endpoints.contains_key(service)
  }

  fn endpoint(&self, service: &str) -> Result<&ServiceEndpoint, CollectError> {
    self.endpoints.get(service).ok_or_else(|| CollectError::SourceConnection {
      service: service.to_string(),
      message: "service is not configured".to_string(),
    })
  }

  /// Resolve `segments` under the service base URL.
  pub fn url(&self, service: &str, segments: &[&str]) -> Result<Url, CollectError> {
    let endpoint = self.endpoint(service)?;
    join_segments(&endpoint.base_url, segments).map_err(|message| CollectError::SourceConnection {
      service: service.to_string(),
      message,
    })
  }

  /// Start a request with the service's credentials attached.
  pub fn request(&self, service: &str, method: Method, url: Url) -> Result<RequestBuilder, CollectError> {
    let endpoint = self.endpoint(service)?;
    let request = self.http.request(method, url);
    Ok(match &endpoint.auth {
      ServiceAuth::None => request,
      ServiceAuth::Basic { username, password } => request.basic_auth(username, password.as_ref()),
      ServiceAuth::ExtraHopKey(key) => request.header("Authorization", format!("ExtraHop apikey={key}")),
    })
  }

  /// Send `request` and decode a JSON body.
  pub async fn execute<T: DeserializeOwned>(&self, service: &str, request: RequestBuilder) -> Result<T, CollectError> {
    let _permit = self.semaphore.acquire().await.map_err(|e| CollectError::SourceConnection {
      service: service.to_string(),
      message: e.to_string(),
    })?;

    let response = request.send().await.map_err(|e| {
      warn!(service, error = %e, "Request failed");
      CollectError::SourceConnection {
        service: service.to_string(),
        message: e.to_string(),
      }
    })?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(CollectError::Query {
        service: service.to_string(),
        message: format!("API error {status}: {body}"),
      });
    }
    debug!(service, status = %status, "Request succeeded");

    response.json::<T>().await.map_err(|e| CollectError::Query {
      service: service.to_string(),
      message: format!("invalid response body: {e}"),
    })
  }
}

/// Append path segments to `base`, percent-encoding each one.
fn join_segments(base: &str, segments: &[&str]) -> Result<Url, String> {
  let mut url = Url::parse(base).map_err(|e| format!("invalid base url '{base}': {e}"))?;
  url
    .path_segments_mut()
    .map_err(|()| format!("base url '{base}' cannot carry a path"))?
    .pop_if_empty()
    .extend(segments);
  Ok(url)
}
