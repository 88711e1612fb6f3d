//! Vendor API Response Types
//!
//! Serde shapes for the AppDynamics metric-data and ExtraHop metrics
//! endpoints, plus their conversion into the source port records.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::ports::sources::{PathMetric, PathMetricValue, StatRecord};

/// One entry of the AppDynamics metric-data response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDynamicsMetric {
  /// `|`-delimited metric path.
  pub metric_path: String,
  /// Rolled-up value windows.
  #[serde(default)]
  pub metric_values: Vec<Map<String, Value>>,
}

const START_TIME_FIELD: &str = "startTimeInMillis";

impl AppDynamicsMetric {
  /// Convert into a path metric. Every numeric field of a window other
  /// than its start time becomes a field, named in snake case.
  pub fn into_path_metric(self) -> PathMetric {
    let values = self
      .metric_values
      .iter()
      .map(|window| PathMetricValue {
        start_time_ms: window.get(START_TIME_FIELD).and_then(Value::as_i64).unwrap_or_default(),
        fields: window
          .iter()
          .filter(|(key, _)| key.as_str() != START_TIME_FIELD)
          .filter_map(|(key, value)| value.as_f64().map(|v| (snake_case(key), v)))
          .collect(),
      })
      .collect();

    PathMetric {
      path: self.metric_path,
      values,
    }
  }
}

fn snake_case(camel: &str) -> String {
  let mut out = String::with_capacity(camel.len() + 4);
  for c in camel.chars() {
    if c.is_ascii_uppercase() {
      if !out.is_empty() {
        out.push('_');
      }
      out.push(c.to_ascii_lowercase());
    } else {
      out.push(c);
    }
  }
  out
}

/// ExtraHop metrics response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtraHopMetrics {
  /// Stat rows.
  #[serde(default)]
  pub stats: Vec<ExtraHopStat>,
}

/// One ExtraHop stat row.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtraHopStat {
  /// Value groups; the first group carries the keyed values.
  #[serde(default)]
  pub values: Vec<Value>,
}

impl ExtraHopMetrics {
  /// Flatten into keyed stat records. Entries without a string key or a
  /// numeric value are skipped.
  pub fn into_records(self) -> Vec<StatRecord> {
    self
      .stats
      .iter()
      .filter_map(|stat| stat.values.first()?.as_array())
      .flatten()
      .filter_map(|entry| {
        let key = entry.pointer("/key/str")?.as_str()?;
        let value = match entry.get("value")? {
          Value::Number(n) => n.as_f64()?,
          Value::String(s) => s.trim().parse().ok()?,
          _ => return None,
        };
        Some(StatRecord {
          key: key.to_string(),
          value,
        })
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_appdynamics_metric_fields() {
    let raw = json!([{
      "metricId": 1,
      "metricName": "BTM|Calls per Minute",
      "metricPath": "Overall Application Performance|Calls per Minute",
      "frequency": "ONE_MIN",
      "metricValues": [{
        "startTimeInMillis": 1_700_000_000_000_i64,
        "value": 12,
        "max": 20,
        "standardDeviation": 0.5,
        "useRange": true
      }]
    }]);
    let metrics: Vec<AppDynamicsMetric> = serde_json::from_value(raw).unwrap();
    let metric = metrics.into_iter().next().unwrap().into_path_metric();

    assert_eq!(metric.path, "Overall Application Performance|Calls per Minute");
    let window = &metric.values[0];
    assert_eq!(window.start_time_ms, 1_700_000_000_000);
    let mut fields = window.fields.clone();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
      fields,
      vec![
        ("max".to_string(), 20.0),
        ("standard_deviation".to_string(), 0.5),
        ("value".to_string(), 12.0),
      ]
    );
  }

  #[test]
  fn test_extrahop_records() {
    let raw = json!({
      "stats": [
        {"oid": 1, "values": [[{"key": {"str": "GET /cart", "key_type": "string"}, "value": 12}]]},
        {"oid": 2, "values": [[]]},
        {"oid": 3, "values": []},
        {"oid": 4, "values": [[{"key": {"str": "POST /pay"}, "value": "7"}, {"value": 1}]]}
      ]
    });
    let metrics: ExtraHopMetrics = serde_json::from_value(raw).unwrap();
    let records = metrics.into_records();
    assert_eq!(
      records,
      vec![
        StatRecord { key: "GET /cart".to_string(), value: 12.0 },
        StatRecord { key: "POST /pay".to_string(), value: 7.0 },
      ]
    );
  }
}
