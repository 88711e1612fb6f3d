//! Exposition Encoding - Metric Sets as Prometheus Text
//!
//! Converts snapshots into gauge `MetricFamily` protos and encodes them
//! with the text encoder. Canonical names are sanitized here and nowhere
//! else.

use std::collections::{BTreeMap, HashSet};

use prometheus::proto::{Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};

use crate::domain::metric::MetricSet;
use crate::domain::normalize::{exposition_label_name, exposition_metric_name};

/// Gauge families for every metric in `set`, one sample per series.
pub fn families(set: &MetricSet, with_timestamps: bool) -> Vec<MetricFamily> {
    let mut out = Vec::new();

    for name in set.names() {
        let mut family = MetricFamily::default();
        family.set_name(exposition_metric_name(name));
        family.set_help(format!("Collected metric {name}"));
        family.set_field_type(MetricType::GAUGE);

        for sample in set.family(name) {
            let mut metric = Metric::default();
            for (key, value) in &sample.labels {
                let mut pair = LabelPair::default();
                pair.set_name(exposition_label_name(key));
                pair.set_value(value.clone());
                metric.mut_label().push(pair);
            }
            let mut gauge = Gauge::default();
            gauge.set_value(sample.value);
            metric.set_gauge(gauge);
            if with_timestamps {
                metric.set_timestamp_ms(sample.timestamp.timestamp_millis());
            }
            family.mut_metric().push(metric);
        }

        if !family.get_metric().is_empty() {
            out.push(family);
        }
    }

    out
}

/// Merge families from several sources by name. A series already seen
/// under the same name and label set is dropped.
pub fn merge(sources: impl IntoIterator<Item = Vec<MetricFamily>>) -> Vec<MetricFamily> {
    let mut by_name: BTreeMap<String, (MetricFamily, HashSet<Vec<(String, String)>>)> =
        BTreeMap::new();

    for families in sources {
        for mut family in families {
            let metrics = family.take_metric();
            let (merged, seen) = by_name
                .entry(family.get_name().to_string())
                .or_insert_with(|| (family.clone(), HashSet::new()));

            for metric in metrics {
                let key: Vec<(String, String)> = metric
                    .get_label()
                    .iter()
                    .map(|l| (l.get_name().to_string(), l.get_value().to_string()))
                    .collect();
                if seen.insert(key) {
                    merged.mut_metric().push(metric);
                }
            }
        }
    }

    by_name
        .into_values()
        .map(|(family, _)| family)
        .filter(|f| !f.get_metric().is_empty())
        .collect()
}

/// Encode families as exposition text.
pub fn encode(families: &[MetricFamily]) -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Encode a whole snapshot.
pub fn render(set: &MetricSet, with_timestamps: bool) -> Result<String, prometheus::Error> {
    encode(&families(set, with_timestamps))
}
