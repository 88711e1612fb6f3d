//! External Job Source Adapters
//!
//! Both sources read the same document shapes:
//! - definitions: a JSON array of `{"id": ..., <body>}` (source order) or
//!   a JSON object keyed by job id (id order)
//! - templates: a JSON object keyed by template name
//!
//! A definition whose `use_template` names a template from the source's
//! own templates document is expanded here. Anything else is left to the
//! job builder and its locally configured templates.

pub mod file;
pub mod http;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::jobs::apply_template;
use crate::config::JobSourceConfig;
use crate::domain::error::JobSourceError;
use crate::ports::job_source::{JobDefinition, JobSource};

pub use file::FileJobSource;
pub use http::HttpJobSource;

/// Build the configured job source.
pub fn build_job_source(config: &JobSourceConfig) -> anyhow::Result<Arc<dyn JobSource>> {
    Ok(match config {
        JobSourceConfig::File {
            path,
            templates_path,
        } => Arc::new(FileJobSource::new(path, templates_path.as_deref())),
        JobSourceConfig::Http {
            url,
            templates_url,
            token,
            timeout_seconds,
        } => Arc::new(HttpJobSource::new(
            url,
            templates_url.as_deref(),
            token.clone(),
            Duration::from_secs(*timeout_seconds),
        )?),
    })
}

/// Split a definitions document into ordered definitions, expanding
/// source-side templates.
pub fn parse_definitions(
    document: Value,
    templates: &BTreeMap<String, Value>,
) -> Result<Vec<JobDefinition>, JobSourceError> {
    let raw: Vec<(String, Value)> = match document {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| split_id(idx, item))
            .collect::<Result<_, _>>()?,
        Value::Object(map) => map.into_iter().collect(),
        other => {
            return Err(JobSourceError::InvalidDocument(format!(
                "expected an array or object of job definitions, got {}",
                kind_of(&other)
            )));
        }
    };

    raw.into_iter()
        .map(|(id, body)| {
            let body = expand(&id, body, templates)?;
            Ok(JobDefinition { id, body })
        })
        .collect()
}

/// Parse a templates document.
pub fn parse_templates(document: Value) -> Result<BTreeMap<String, Value>, JobSourceError> {
    match document {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(JobSourceError::InvalidDocument(format!(
            "expected an object of templates, got {}",
            kind_of(&other)
        ))),
    }
}

fn split_id(idx: usize, item: Value) -> Result<(String, Value), JobSourceError> {
    let Value::Object(mut body) = item else {
        return Err(JobSourceError::InvalidDocument(format!(
            "definition #{idx} is not an object"
        )));
    };
    match body.remove("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok((id, Value::Object(body))),
        _ => Err(JobSourceError::InvalidDocument(format!(
            "definition #{idx} has no string id"
        ))),
    }
}

fn expand(id: &str, body: Value, templates: &BTreeMap<String, Value>) -> Result<Value, JobSourceError> {
    let own = matches!(
        body.get("use_template"),
        Some(Value::String(name)) if templates.contains_key(name)
    );
    if own {
        Ok(apply_template(id, body, templates)?)
    } else {
        Ok(body)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_keeps_source_order() {
        let doc = json!([
            {"id": "zeta", "interval_minutes": 1},
            {"id": "alpha", "interval_minutes": 2},
        ]);
        let defs = parse_definitions(doc, &BTreeMap::new()).unwrap();
        let ids: Vec<&str> = defs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
        assert_eq!(defs[0].body, json!({"interval_minutes": 1}));
    }

    #[test]
    fn test_object_keyed_by_id() {
        let doc = json!({"b": {"interval_minutes": 1}, "a": {"interval_minutes": 2}});
        let defs = parse_definitions(doc, &BTreeMap::new()).unwrap();
        assert_eq!(defs.len(), 2);
        assert!(defs.iter().any(|d| d.id == "a"));
    }

    #[test]
    fn test_source_templates_expanded() {
        let templates = parse_templates(json!({
            "hourly": {"interval_minutes": 60, "statement": "SELECT 1"}
        }))
        .unwrap();
        let doc = json!([{"id": "q", "use_template": "hourly", "statement": "SELECT 2"}]);

        let defs = parse_definitions(doc, &templates).unwrap();
        assert_eq!(
            defs[0].body,
            json!({"interval_minutes": 60, "statement": "SELECT 2"})
        );
    }

    #[test]
    fn test_unknown_template_left_for_builder() {
        let doc = json!([{"id": "q", "use_template": "local_only"}]);
        let defs = parse_definitions(doc, &BTreeMap::new()).unwrap();
        assert_eq!(defs[0].body, json!({"use_template": "local_only"}));
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(
            parse_definitions(json!("nope"), &BTreeMap::new()),
            Err(JobSourceError::InvalidDocument(_))
        ));
        assert!(matches!(
            parse_definitions(json!([{"interval_minutes": 1}]), &BTreeMap::new()),
            Err(JobSourceError::InvalidDocument(_))
        ));
        assert!(parse_templates(json!([])).is_err());
    }

    #[test]
    fn test_non_object_template_is_config_error() {
        let templates = parse_templates(json!({"broken": 5})).unwrap();
        let doc = json!([{"id": "q", "use_template": "broken"}]);
        assert!(matches!(
            parse_definitions(doc, &templates),
            Err(JobSourceError::Config(_))
        ));
    }
}
