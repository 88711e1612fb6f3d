//! Label and metric-name normalization.
//!
//! Pure string transforms that turn vendor column names, path tokens and
//! service names into canonical metric names and label keys. Every
//! transform is deterministic and idempotent: feeding its output back in
//! returns the same string.

/// Vendor spellings rewritten before any other transform.
const ALIASES: &[(&str, &str)] = &[("SQL*Net", "Net8"), ("I/O", "IO")];

/// Formats a raw column, field or path token into a label key.
///
/// Symbols are transliterated (`%` → `percent`, `>` → `greater_than`,
/// `<` → `less_than`), quotes, parentheses and periods are dropped, and
/// every other separator collapses into a single underscore.
///
/// ```
/// use metric_bridge::domain::normalize::format_label;
///
/// assert_eq!(format_label("SQL*Net (bytes)/sec"), "net8_bytes_sec");
/// assert_eq!(format_label("CPU %"), "cpu_percent");
/// ```
pub fn format_label(raw: &str) -> String {
    let mut text = raw.to_string();
    for (from, to) in ALIASES {
        if text.contains(from) {
            text = text.replace(from, to);
        }
    }
    finish(&transliterate(&text))
}

/// Formats a raw token into a metric-name component.
///
/// Same as [`format_label`] except that a `/` followed by a word reads as
/// a rate: `Bytes/sec` becomes `bytes_per_sec`.
pub fn format_metric(raw: &str) -> String {
    let mut rate = String::with_capacity(raw.len() + 8);
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' && chars.peek().is_some_and(char::is_ascii_alphabetic) {
            rate.push_str("_per_");
        } else {
            rate.push(c);
        }
    }
    format_label(&rate)
}

fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '%' => out.push_str(" percent "),
            '>' => out.push_str(" greater than "),
            '<' => out.push_str(" less than "),
            '(' | ')' | '.' | '\'' | '"' => {}
            other => out.push(other),
        }
    }
    out
}

fn finish(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Singular form of the last word of a formatted label.
///
/// Used for generic path categories such as `Individual Nodes`
/// (`individual_node`) or `Hardware Resources` (`hardware_resource`).
pub fn singularize(label: &str) -> String {
    let (head, last) = match label.rfind('_') {
        Some(idx) => label.split_at(idx + 1),
        None => ("", label),
    };

    let singular = if let Some(stem) = last.strip_suffix("ies") {
        format!("{stem}y")
    } else if let Some(stem) = last.strip_suffix("sses") {
        format!("{stem}ss")
    } else if last.len() > 3
        && last.ends_with('s')
        && !last.ends_with("ss")
        && !last.ends_with("us")
        && !last.ends_with("is")
    {
        last[..last.len() - 1].to_string()
    } else {
        last.to_string()
    };

    format!("{head}{singular}")
}

/// Splits a service name into its metric prefix and optional instance.
///
/// `Warehouse[east-1]` yields `("warehouse", Some("east-1"))`; the prefix
/// is lower-cased with every bracketed group removed.
pub fn service_metric_info(service: &str) -> (String, Option<String>) {
    let mut prefix = String::with_capacity(service.len());
    let mut instance = None;
    let mut rest = service;

    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        match after.find(']') {
            Some(close) if !after[..close].contains('[') && close > 0 => {
                prefix.push_str(&rest[..open]);
                if instance.is_none() {
                    instance = Some(after[..close].to_string());
                }
                rest = &after[close + 1..];
            }
            _ => {
                prefix.push_str(&rest[..=open]);
                rest = after;
            }
        }
    }
    prefix.push_str(rest);

    (prefix.to_lowercase(), instance)
}

/// Index of `wanted` in `columns`, compared case-insensitively.
pub fn find_column<S: AsRef<str>>(columns: &[S], wanted: &str) -> Option<usize> {
    columns
        .iter()
        .position(|c| c.as_ref().eq_ignore_ascii_case(wanted))
}

/// Configured fields that are not present in `columns`.
pub fn missing_fields<S: AsRef<str>>(columns: &[S], wanted: &[&str]) -> Vec<String> {
    wanted
        .iter()
        .filter(|w| find_column(columns, w).is_none())
        .map(|w| (*w).to_string())
        .collect()
}

/// Canonical metric name rewritten into a valid exposition identifier.
pub fn exposition_metric_name(name: &str) -> String {
    sanitize(name, |c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Label key rewritten into a valid exposition identifier.
pub fn exposition_label_name(name: &str) -> String {
    sanitize(name, |c| c.is_ascii_alphanumeric() || c == '_')
}

fn sanitize(name: &str, valid: impl Fn(char) -> bool) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if valid(c) { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_label_vendor_alias() {
        assert_eq!(format_label("SQL*Net (bytes)/sec"), "net8_bytes_sec");
        assert_eq!(format_label("Physical I/O"), "physical_io");
    }

    #[test]
    fn test_format_label_symbols() {
        assert_eq!(format_label("%CPU"), "percent_cpu");
        assert_eq!(format_label("CPU %"), "cpu_percent");
        assert_eq!(format_label("Latency > 5s"), "latency_greater_than_5s");
        assert_eq!(format_label("Latency<5s"), "latency_less_than_5s");
        assert_eq!(format_label("Host-Name"), "host_name");
        assert_eq!(format_label("Calls  per   Minute"), "calls_per_minute");
        assert_eq!(format_label("Avg. Response Time (ms)"), "avg_response_time_ms");
    }

    #[test]
    fn test_format_label_leading_digit() {
        assert_eq!(format_label("95th Percentile"), "_95th_percentile");
        assert_eq!(format_label("_95th_percentile"), "_95th_percentile");
    }

    #[test]
    fn test_format_label_idempotent() {
        for raw in ["SQL*Net (bytes)/sec", "%Busy", "a--b__c", " 1 x ", "", "___"] {
            let once = format_label(raw);
            assert_eq!(format_label(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_format_metric_rate() {
        assert_eq!(format_metric("Bytes/sec"), "bytes_per_sec");
        assert_eq!(format_metric("SQL*Net (bytes)/sec"), "net8_bytes_per_sec");
        assert_eq!(format_metric("metric"), "metric");
        assert_eq!(format_metric("bytes_per_sec"), "bytes_per_sec");
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("individual_nodes"), "individual_node");
        assert_eq!(singularize("entities"), "entity");
        assert_eq!(singularize("classes"), "class");
        assert_eq!(singularize("status"), "status");
        assert_eq!(singularize("tier"), "tier");
    }

    #[test]
    fn test_service_metric_info() {
        assert_eq!(
            service_metric_info("Warehouse[east-1]"),
            ("warehouse".to_string(), Some("east-1".to_string()))
        );
        assert_eq!(service_metric_info("ORDERS"), ("orders".to_string(), None));
        assert_eq!(service_metric_info("bad[]"), ("bad[]".to_string(), None));
    }

    #[test]
    fn test_find_column_case_insensitive() {
        let columns = ["METRIC", "Label1", "ts"];
        assert_eq!(find_column(&columns, "metric"), Some(0));
        assert_eq!(find_column(&columns, "TS"), Some(2));
        assert_eq!(missing_fields(&columns, &["metric", "value"]), vec!["value"]);
    }

    #[test]
    fn test_exposition_names() {
        assert_eq!(exposition_metric_name("warehouse.rows_total"), "warehouse_rows_total");
        assert_eq!(exposition_metric_name("1x"), "_1x");
        assert_eq!(exposition_label_name("a:b"), "a_b");
    }
}
