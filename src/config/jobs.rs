//! Job Builder - Raw Definitions to Immutable Job Specs
//!
//! Every job definition, local or external, goes through one explicit
//! pass: template merge, `%%VAR%%` environment substitution, service
//! resolution and category-specific validation. Anything invalid is a
//! `ConfigError` naming the job; nothing half-built is ever scheduled.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;

use super::ServicesConfig;
use crate::domain::aggregation::{Aggregation, AggregationDef};
use crate::domain::error::ConfigError;
use crate::domain::job::{Category, CategoryParams, JobOrigin, JobSpec, SourceRef};
use crate::domain::normalize::{format_label, service_metric_info};
use crate::ports::job_source::JobDefinition;

/// Environment variable lookup.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Process environment lookup.
pub fn env_lookup(name: &str) -> Option<String> {
  std::env::var(name).ok()
}

/// Replace every `%%VAR%%` placeholder in `raw`. `owner` names the job
/// or service in the error when a variable is undefined.
pub fn substitute_with(owner: &str, raw: &str, env: &dyn Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
  let mut undefined = Vec::new();
  let out = substitute_collect(raw, env, &mut undefined);
  if undefined.is_empty() {
    Ok(out)
  } else {
    Err(ConfigError::UndefinedEnvVars {
      owner: owner.to_string(),
      vars: undefined.join(", "),
    })
  }
}

fn substitute_collect(raw: &str, env: &dyn Fn(&str) -> Option<String>, undefined: &mut Vec<String>) -> String {
  let mut out = String::with_capacity(raw.len());
  let mut rest = raw;

  while let Some(start) = rest.find("%%") {
    let after = &rest[start + 2..];
    let name_len = after
      .find(|c: char| !(c.is_alphanumeric() || c == '_'))
      .unwrap_or(after.len());

    if name_len == 0 || !after[name_len..].starts_with("%%") {
      out.push_str(&rest[..start + 1]);
      rest = &rest[start + 1..];
      continue;
    }

    let name = &after[..name_len];
    out.push_str(&rest[..start]);
    match env(name) {
      Some(value) => out.push_str(&value),
      None => {
        out.push_str(&rest[start..start + name_len + 4]);
        if !undefined.iter().any(|u| u == name) {
          undefined.push(name.to_string());
        }
      }
    }
    rest = &after[name_len + 2..];
  }

  out.push_str(rest);
  out
}

fn substitute_value(value: &mut Value, env: &dyn Fn(&str) -> Option<String>, undefined: &mut Vec<String>) {
  match value {
    Value::String(s) => *s = substitute_collect(s, env, undefined),
    Value::Array(items) => {
      for item in items {
        substitute_value(item, env, undefined);
      }
    }
    Value::Object(map) => {
      for item in map.values_mut() {
        substitute_value(item, env, undefined);
      }
    }
    _ => {}
  }
}

/// Merge the template named by `use_template` under the job's own keys.
/// Job keys win; the merge is shallow.
pub fn apply_template(job_id: &str, body: Value, templates: &BTreeMap<String, Value>) -> Result<Value, ConfigError> {
  let Value::Object(mut job) = body else {
    return Err(malformed(job_id, "definition is not a table"));
  };

  match job.remove("use_template") {
    None => Ok(Value::Object(job)),
    Some(Value::String(name)) => {
      let Some(Value::Object(template)) = templates.get(&name) else {
        return Err(ConfigError::UndefinedTemplate {
          job: job_id.to_string(),
          template: name,
        });
      };
      let mut merged = template.clone();
      merged.extend(job);
      Ok(Value::Object(merged))
    }
    Some(_) => Err(malformed(job_id, "use_template must be a string")),
  }
}

fn malformed(job_id: &str, message: impl Into<String>) -> ConfigError {
  ConfigError::Malformed {
    job: job_id.to_string(),
    message: message.into(),
  }
}

/// Resolved source and push services.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
  sources: BTreeMap<String, (Category, SourceRef)>,
  push: BTreeSet<String>,
  default_push: Vec<String>,
}

impl ServiceCatalog {
  /// Catalog over the configured services.
  pub fn from_config(services: &ServicesConfig) -> anyhow::Result<Self> {
    let mut catalog = Self::default();
    for (name, service) in &services.source {
      let timezone = match &service.timezone {
        Some(tz) => tz
          .parse::<Tz>()
          .map_err(|e| anyhow::anyhow!("Source service '{name}' has unknown timezone '{tz}': {e}"))?,
        None => Tz::UTC,
      };
      catalog = catalog.with_source(name, service.kind.category(), timezone);
    }
    for name in services.push.keys() {
      catalog = catalog.with_push(name);
    }
    catalog.default_push.clone_from(&services.default_push);
    Ok(catalog)
  }

  /// Add a source service.
  pub fn with_source(mut self, name: &str, category: Category, timezone: Tz) -> Self {
    let (prefix, instance) = service_metric_info(name);
    let source = SourceRef {
      name: name.to_string(),
      prefix,
      instance,
      timezone,
    };
    self.sources.insert(name.to_string(), (category, source));
    self
  }

  /// Add a push destination.
  pub fn with_push(mut self, name: &str) -> Self {
    self.push.insert(name.to_string());
    self
  }

  /// Destinations for jobs that declare none.
  pub fn with_default_push(mut self, names: Vec<String>) -> Self {
    self.default_push = names;
    self
  }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringList {
  One(String),
  Many(Vec<String>),
}

impl StringList {
  fn into_vec(self) -> Vec<String> {
    match self {
      Self::One(s) => s
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect(),
      Self::Many(v) => v.into_iter().map(|s| s.trim().to_string()).collect(),
    }
  }
}

#[derive(Debug, Default, Deserialize)]
struct RawServices {
  #[serde(default)]
  source: Option<StringList>,
  #[serde(default)]
  push: Option<StringList>,
}

#[derive(Debug, Deserialize)]
struct RawJob {
  #[serde(default)]
  services: RawServices,
  #[serde(default)]
  interval_minutes: Option<Value>,
  #[serde(default)]
  static_labels: Option<Value>,
  #[serde(default)]
  statement: Option<String>,
  #[serde(default)]
  value_columns: Option<StringList>,
  #[serde(default)]
  timestamp_column: Option<String>,
  #[serde(default)]
  application: Option<String>,
  #[serde(default)]
  metric_path: Option<String>,
  #[serde(default)]
  metric_params: Option<Value>,
  #[serde(default)]
  metric_name: Option<String>,
  #[serde(default)]
  aggregation: Option<AggregationDef>,
}

/// Turns raw job definitions into `JobSpec`s.
#[derive(Clone)]
pub struct JobBuilder {
  catalog: ServiceCatalog,
  templates: BTreeMap<String, Value>,
  env: EnvLookup,
}

impl JobBuilder {
  /// Builder over `catalog` and `templates`, reading the process
  /// environment.
  pub fn new(catalog: ServiceCatalog, templates: BTreeMap<String, Value>) -> Self {
    Self {
      catalog,
      templates,
      env: Arc::new(env_lookup),
    }
  }

  /// Builder for a loaded configuration.
  pub fn from_config(config: &super::AppConfig) -> anyhow::Result<Self> {
    Ok(Self::new(
      ServiceCatalog::from_config(&config.services)?,
      config.templates.clone(),
    ))
  }

  /// Replace the environment lookup.
  pub fn with_env(mut self, env: EnvLookup) -> Self {
    self.env = env;
    self
  }

  /// Build every local job, failing on the first invalid one.
  pub fn build_local(&self, jobs: &BTreeMap<String, Value>) -> Result<Vec<JobSpec>, ConfigError> {
    jobs
      .iter()
      .map(|(id, body)| {
        let def = JobDefinition {
          id: id.clone(),
          body: body.clone(),
        };
        self.build(&def, JobOrigin::Local)
      })
      .collect()
  }

  /// Build one job.
  pub fn build(&self, def: &JobDefinition, origin: JobOrigin) -> Result<JobSpec, ConfigError> {
    let id = def.id.as_str();
    let mut body = apply_template(id, def.body.clone(), &self.templates)?;

    let mut undefined = Vec::new();
    substitute_value(&mut body, self.env.as_ref(), &mut undefined);
    if !undefined.is_empty() {
      return Err(ConfigError::UndefinedEnvVars {
        owner: id.to_string(),
        vars: undefined.join(", "),
      });
    }

    let raw: RawJob = serde_json::from_value(body).map_err(|e| malformed(id, e.to_string()))?;

    let (category, sources) = self.resolve_sources(id, raw.services.source)?;
    let push = self.resolve_push(id, raw.services.push)?;
    let interval_minutes = parse_interval(id, raw.interval_minutes.as_ref())?;
    let static_labels = parse_static_labels(id, raw.static_labels.as_ref())?;

    let params = match category {
      Category::Database => {
        let mut missing = Vec::new();
        if raw.statement.is_none() {
          missing.push("statement");
        }
        if raw.value_columns.is_none() {
          missing.push("value_columns");
        }
        match (raw.statement, raw.value_columns) {
          (Some(statement), Some(value_columns)) => CategoryParams::Database {
            statement,
            value_columns: value_columns.into_vec(),
            timestamp_column: raw.timestamp_column.filter(|c| !c.trim().is_empty()),
          },
          _ => return Err(missing_field(id, &missing)),
        }
      }
      Category::AppDynamics => match (raw.application, raw.metric_path) {
        (Some(application), Some(metric_path)) => CategoryParams::MetricTree {
          application,
          metric_path,
          duration_minutes: interval_minutes,
        },
        (application, _) => {
          let missing: Vec<&str> = if application.is_none() {
            vec!["application", "metric_path"]
          } else {
            vec!["metric_path"]
          };
          return Err(missing_field(id, &missing));
        }
      },
      Category::ExtraHop => {
        let mut missing = Vec::new();
        if raw.metric_params.is_none() {
          missing.push("metric_params");
        }
        if raw.metric_name.is_none() {
          missing.push("metric_name");
        }
        if raw.aggregation.is_none() {
          missing.push("aggregation");
        }
        match (raw.metric_params, raw.metric_name, raw.aggregation) {
          (Some(metric_params), Some(metric_name), Some(def)) => CategoryParams::Stats {
            metric_params,
            metric_name,
            aggregation: Aggregation::parse(&def).map_err(|source| ConfigError::Aggregation {
              job: id.to_string(),
              source,
            })?,
            duration_minutes: interval_minutes,
          },
          _ => return Err(missing_field(id, &missing)),
        }
      }
    };

    Ok(JobSpec {
      id: id.to_string(),
      category,
      sources,
      push,
      interval_minutes,
      params,
      static_labels,
      origin,
    })
  }

  fn resolve_sources(&self, id: &str, raw: Option<StringList>) -> Result<(Category, Vec<SourceRef>), ConfigError> {
    let names = raw.map(StringList::into_vec).unwrap_or_default();
    let mut seen = BTreeSet::new();
    let mut category = None;
    let mut sources = Vec::with_capacity(names.len());

    for name in names {
      let Some((kind, source)) = self.catalog.sources.get(&name) else {
        return Err(ConfigError::UnknownService {
          job: id.to_string(),
          service: name,
        });
      };
      if !seen.insert(name.clone()) {
        return Err(ConfigError::DuplicateService {
          job: id.to_string(),
          service: name,
        });
      }
      match category {
        None => category = Some(*kind),
        Some(c) if c != *kind => {
          return Err(ConfigError::MixedCategories { job: id.to_string() });
        }
        Some(_) => {}
      }
      sources.push(source.clone());
    }

    match category {
      Some(category) => Ok((category, sources)),
      None => Err(ConfigError::NoSources { job: id.to_string() }),
    }
  }

  fn resolve_push(&self, id: &str, raw: Option<StringList>) -> Result<Vec<String>, ConfigError> {
    let names = match raw {
      Some(list) => list.into_vec(),
      None => self.catalog.default_push.clone(),
    };
    let mut push: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
      if !self.catalog.push.contains(&name) {
        return Err(ConfigError::UnknownService {
          job: id.to_string(),
          service: name,
        });
      }
      if !push.contains(&name) {
        push.push(name);
      }
    }
    Ok(push)
  }
}

impl fmt::Debug for JobBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JobBuilder")
      .field("catalog", &self.catalog)
      .field("templates", &self.templates.keys().collect::<Vec<_>>())
      .finish_non_exhaustive()
  }
}

fn missing_field(id: &str, fields: &[&str]) -> ConfigError {
  ConfigError::MissingField {
    job: id.to_string(),
    fields: fields.join(", "),
  }
}

fn parse_interval(id: &str, raw: Option<&Value>) -> Result<u64, ConfigError> {
  let minutes = match raw {
    None => return Err(missing_field(id, &["interval_minutes"])),
    Some(Value::Number(n)) => n.as_u64(),
    Some(Value::String(s)) => s.trim().parse().ok(),
    Some(_) => None,
  };
  match minutes {
    Some(m) if m >= 1 => Ok(m),
    Some(m) => Err(ConfigError::InvalidInterval {
      job: id.to_string(),
      minutes: m,
    }),
    None => Err(malformed(id, "interval_minutes must be a positive integer")),
  }
}

/// `"env:prod, region:east"` or a table; keys are formatted as labels.
fn parse_static_labels(id: &str, raw: Option<&Value>) -> Result<Vec<(String, String)>, ConfigError> {
  let mut labels: Vec<(String, String)> = Vec::new();
  let mut push = |key: &str, value: String| {
    let key = format_label(key);
    if !labels.iter().any(|(k, _)| *k == key) {
      labels.push((key, value));
    }
  };

  match raw {
    None | Some(Value::Null) => {}
    Some(Value::String(s)) => {
      for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match pair.split_once(':') {
          Some((key, value)) if !key.trim().is_empty() => push(key.trim(), value.trim().to_string()),
          _ => return Err(malformed(id, format!("static label '{pair}' is not 'key:value'"))),
        }
      }
    }
    Some(Value::Object(map)) => {
      for (key, value) in map {
        let value = match value {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        push(key, value);
      }
    }
    Some(_) => return Err(malformed(id, "static_labels must be a string or a table")),
  }

  Ok(labels)
}
