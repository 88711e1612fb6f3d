//! Configuration Module - TOML-based Exporter Configuration
//!
//! Loads and validates configuration from `config.toml`. Service
//! entries carry ready-made connection URLs; job definitions stay loosely
//! typed here and are turned into `JobSpec`s by [`jobs::JobBuilder`].
//! Nothing about sources or destinations is hardcoded elsewhere.

pub mod jobs;
pub mod loader;

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::job::Category;

/// Top-level exporter configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before any job is scheduled.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Exporter identity and HTTP surface.
  pub exporter: ExporterConfig,
  /// Trigger policies and execution deadlines.
  #[serde(default)]
  pub scheduler: SchedulerSettings,
  /// Worker pool sizes.
  #[serde(default)]
  pub executors: ExecutorConfig,
  /// Registry options.
  #[serde(default)]
  pub metrics: MetricsConfig,
  /// External job source polling.
  #[serde(default)]
  pub reconciliation: ReconciliationConfig,
  /// Source and push service catalog.
  #[serde(default)]
  pub services: ServicesConfig,
  /// Job templates referenced by `use_template`.
  #[serde(default)]
  pub templates: BTreeMap<String, Value>,
  /// Local job definitions by id.
  #[serde(default)]
  pub jobs: BTreeMap<String, Value>,
}

/// Exporter identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
  /// Human-readable exporter name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// HTTP bind address for exposition, control and probes.
  #[serde(default = "default_bind_addr")]
  pub bind_address: String,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
  /// Delay between first runs of consecutively added jobs (seconds).
  #[serde(default = "default_stagger")]
  pub stagger_seconds: u64,
  /// How late a firing may start before it is dropped (seconds).
  #[serde(default = "default_misfire_grace")]
  pub misfire_grace_seconds: u64,
  /// Pause jobs whose run fails or times out.
  #[serde(default)]
  pub suspend_on_failure: bool,
  /// Bound each run by the time left until its next firing.
  #[serde(default = "default_true")]
  pub deadlines_enabled: bool,
  /// Subtracted from the time left until the next firing (seconds).
  #[serde(default = "default_safety_margin")]
  pub safety_margin_seconds: u64,
  /// Floor for computed deadlines (seconds).
  #[serde(default = "default_min_deadline")]
  pub min_deadline_seconds: u64,
  /// Categories that always run unbounded.
  #[serde(default)]
  pub exempt_categories: Vec<Category>,
}

impl Default for SchedulerSettings {
  fn default() -> Self {
    Self {
      stagger_seconds: default_stagger(),
      misfire_grace_seconds: default_misfire_grace(),
      suspend_on_failure: false,
      deadlines_enabled: default_true(),
      safety_margin_seconds: default_safety_margin(),
      min_deadline_seconds: default_min_deadline(),
      exempt_categories: Vec::new(),
    }
  }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
  /// Workers for network-bound jobs.
  #[serde(default = "default_workers")]
  pub default_workers: usize,
  /// Workers for database jobs. Defaults to host parallelism.
  #[serde(default)]
  pub heavy_workers: Option<usize>,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      default_workers: default_workers(),
      heavy_workers: None,
    }
  }
}

/// Registry configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
  /// Shared directory for multi-process snapshot shards.
  #[serde(default)]
  pub shard_dir: Option<String>,
}

/// External job source polling.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
  /// Poll the job source.
  #[serde(default)]
  pub enabled: bool,
  /// Poll interval (minutes).
  #[serde(default = "default_refresh_minutes")]
  pub interval_minutes: u64,
  /// Where definitions come from.
  #[serde(default)]
  pub source: Option<JobSourceConfig>,
}

impl Default for ReconciliationConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      interval_minutes: default_refresh_minutes(),
      source: None,
    }
  }
}

/// External job source location.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobSourceConfig {
  /// JSON documents on the local filesystem.
  File {
    /// Job definitions document.
    path: String,
    /// Optional templates document.
    #[serde(default)]
    templates_path: Option<String>,
  },
  /// JSON documents over HTTP.
  Http {
    /// Job definitions URL.
    url: String,
    /// Optional templates URL.
    #[serde(default)]
    templates_url: Option<String>,
    /// Optional bearer token.
    #[serde(default)]
    token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    timeout_seconds: u64,
  },
}

/// Service catalog.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicesConfig {
  /// Source services by name (`Name` or `Name[instance]`).
  #[serde(default)]
  pub source: BTreeMap<String, SourceServiceConfig>,
  /// Push destinations by name.
  #[serde(default)]
  pub push: BTreeMap<String, PushServiceConfig>,
  /// Destinations used by jobs that declare none.
  #[serde(default)]
  pub default_push: Vec<String>,
}

/// Source service vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
  /// PostgreSQL database.
  Postgres,
  /// AppDynamics controller.
  AppDynamics,
  /// ExtraHop appliance.
  ExtraHop,
}

impl SourceKind {
  /// Job category served by this vendor.
  pub fn category(self) -> Category {
    match self {
      Self::Postgres => Category::Database,
      Self::AppDynamics => Category::AppDynamics,
      Self::ExtraHop => Category::ExtraHop,
    }
  }
}

/// One source service.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceServiceConfig {
  /// Vendor.
  pub kind: SourceKind,
  /// Connection URL.
  pub url: String,
  /// Basic-auth user.
  #[serde(default)]
  pub username: Option<String>,
  /// Basic-auth password.
  #[serde(default)]
  pub password: Option<String>,
  /// API key (ExtraHop).
  #[serde(default)]
  pub api_key: Option<String>,
  /// IANA timezone for naive timestamps. Defaults to UTC.
  #[serde(default)]
  pub timezone: Option<String>,
  /// Connect/request timeout in seconds.
  #[serde(default = "default_timeout")]
  pub timeout_seconds: u64,
}

/// Push destination vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushKind {
  /// Prometheus Pushgateway. Timestamps are stripped.
  Pushgateway,
  /// Timestamp-capable text import endpoint.
  Import,
}

/// One push destination.
#[derive(Debug, Clone, Deserialize)]
pub struct PushServiceConfig {
  /// Vendor.
  pub kind: PushKind,
  /// Base URL.
  pub url: String,
  /// Basic-auth user.
  #[serde(default)]
  pub username: Option<String>,
  /// Basic-auth password.
  #[serde(default)]
  pub password: Option<String>,
  /// Request timeout in seconds.
  #[serde(default = "default_timeout")]
  pub timeout_seconds: u64,
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_bind_addr() -> String {
  "0.0.0.0:5000".to_string()
}

fn default_true() -> bool {
  true
}

fn default_stagger() -> u64 {
  5
}

fn default_misfire_grace() -> u64 {
  5
}

fn default_safety_margin() -> u64 {
  5
}

fn default_min_deadline() -> u64 {
  10
}

fn default_workers() -> usize {
  20
}

fn default_refresh_minutes() -> u64 {
  60
}

fn default_timeout() -> u64 {
  30
}
