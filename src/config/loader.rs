//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, substituting `%%VAR%%` placeholders
//! in service entries, validating all parameters, and providing clear
//! error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::jobs::{env_lookup, substitute_with};
use super::{AppConfig, JobSourceConfig};

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - A service entry references an undefined environment variable
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    sources = config.services.source.len(),
    destinations = config.services.push.len(),
    jobs = config.jobs.len(),
    reconciliation = config.reconciliation.enabled,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse, substitute and validate configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let mut config: AppConfig = toml::from_str(content).context("Failed to parse config.toml")?;
  substitute_services(&mut config, &env_lookup)?;
  validate_config(&config)?;
  Ok(config)
}

/// Replace `%%VAR%%` placeholders in every service and job-source string.
fn substitute_services(config: &mut AppConfig, env: &dyn Fn(&str) -> Option<String>) -> Result<()> {
  for (name, service) in &mut config.services.source {
    service.url = substitute_with(name, &service.url, env)?;
    for value in [&mut service.username, &mut service.password, &mut service.api_key] {
      if let Some(v) = value {
        *v = substitute_with(name, v, env)?;
      }
    }
  }

  for (name, service) in &mut config.services.push {
    service.url = substitute_with(name, &service.url, env)?;
    for value in [&mut service.username, &mut service.password] {
      if let Some(v) = value {
        *v = substitute_with(name, v, env)?;
      }
    }
  }

  if let Some(JobSourceConfig::Http { url, token, .. }) = &mut config.reconciliation.source {
    *url = substitute_with("reconciliation.source", url, env)?;
    if let Some(t) = token {
      *t = substitute_with("reconciliation.source", t, env)?;
    }
  }

  Ok(())
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Non-empty service URLs and parseable timezones
/// - Default push destinations that exist
/// - Positive intervals and worker counts
/// - A job source whenever reconciliation is enabled
fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(
    !config.exporter.name.is_empty(),
    "Exporter name must not be empty"
  );

  // Service validation
  for (name, service) in &config.services.source {
    anyhow::ensure!(!service.url.is_empty(), "Source service '{}' has empty url", name);
    if let Some(tz) = &service.timezone {
      anyhow::ensure!(
        tz.parse::<chrono_tz::Tz>().is_ok(),
        "Source service '{}' has unknown timezone '{}'",
        name,
        tz
      );
    }
  }
  for (name, service) in &config.services.push {
    anyhow::ensure!(!service.url.is_empty(), "Push service '{}' has empty url", name);
  }
  for name in &config.services.default_push {
    anyhow::ensure!(
      config.services.push.contains_key(name),
      "default_push references unknown push service '{}'",
      name
    );
  }

  // Scheduler validation
  anyhow::ensure!(
    config.executors.default_workers > 0,
    "executors.default_workers must be positive"
  );
  anyhow::ensure!(
    config.executors.heavy_workers != Some(0),
    "executors.heavy_workers must be positive"
  );
  anyhow::ensure!(
    config.scheduler.min_deadline_seconds > 0,
    "scheduler.min_deadline_seconds must be positive"
  );

  // Reconciliation validation
  if config.reconciliation.enabled {
    anyhow::ensure!(
      config.reconciliation.source.is_some(),
      "Reconciliation is enabled but no job source is configured"
    );
    anyhow::ensure!(
      config.reconciliation.interval_minutes > 0,
      "reconciliation.interval_minutes must be positive"
    );
  }

  Ok(())
}
