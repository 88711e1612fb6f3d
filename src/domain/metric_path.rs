//! Metric Path Decomposition - Hierarchical APM Metric Paths
//!
//! Splits a `|`-delimited metric path (e.g.
//! `Overall Application Performance|web|Individual Nodes|web-1|Calls per Minute`)
//! into label pairs and a metric profile. Middle tokens are consumed by a
//! rule table keyed on the root token; whatever remains becomes the
//! profile.

use super::normalize::{format_label, format_metric, singularize};

/// Application name that switches to the database-monitoring layout.
pub const DATABASE_MONITORING: &str = "Database Monitoring";

const BACKENDS: &str = "Backends";
const SERVICE_ENDPOINTS: &str = "Service Endpoints";
const OVERALL_PERFORMANCE: &str = "Overall Application Performance";
const BUSINESS_TRANSACTIONS_ROOT: &str = "Business Transaction Performance";
const INFRASTRUCTURE: &str = "Application Infrastructure Performance";

const INDIVIDUAL_NODES: &str = "Individual Nodes";
const EXTERNAL_CALLS: &str = "External Calls";
const BT_GROUPS: &str = "Business Transaction Groups";
const BTS: &str = "Business Transactions";

const BACKEND_CALL: &str = "Discovered backend call - ";
const EXTERNAL_CALL: &str = " to Discovered backend call - ";

/// Labels and profile extracted from one metric path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLabels {
    /// Label pairs in discovery order. Keys are formatted, values raw.
    pub labels: Vec<(String, String)>,
    /// Metric-name component built from the unconsumed tokens.
    pub profile: String,
}

/// Decompose `path` reported for `application`.
pub fn decompose(application: &str, path: &str) -> PathLabels {
    let mut walk = Walk {
        tokens: path.split('|').map(str::to_string).collect(),
        labels: Vec::new(),
    };

    if application == DATABASE_MONITORING {
        walk.database_monitoring();
    } else {
        walk.labels
            .push(("application".to_string(), application.to_string()));
        walk.application();
    }

    let profile = walk
        .tokens
        .iter()
        .map(|t| format_metric(t))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    PathLabels {
        labels: walk.labels,
        profile,
    }
}

struct Walk {
    tokens: Vec<String>,
    labels: Vec<(String, String)>,
}

impl Walk {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(1).map(String::as_str)
    }

    /// Remove the first middle token; the root and the metric leaf stay.
    fn take(&mut self) -> Option<String> {
        (self.tokens.len() > 2).then(|| self.tokens.remove(1))
    }

    fn push(&mut self, key: impl Into<String>, value: String) {
        self.labels.push((key.into(), value));
    }

    fn named(&mut self, key: &str) {
        if let Some(value) = self.take() {
            self.push(key, value);
        }
    }

    /// `<Category>|<value>` pair, keyed by the singular category.
    fn pair(&mut self) -> bool {
        if self.tokens.len() <= 3 {
            return false;
        }
        let key = singularize(&format_label(&self.tokens.remove(1)));
        let value = self.tokens.remove(1);
        self.push(key, value);
        true
    }

    fn generic(&mut self) {
        while self.pair() {}
    }

    fn individual_nodes(&mut self) {
        if self.peek() == Some(INDIVIDUAL_NODES) {
            self.pair();
        }
    }

    /// Pairs until an `External Calls` entry, which ends the walk.
    fn pairs_until_external_call(&mut self) {
        while self.tokens.len() > 3 {
            if self.peek() == Some(EXTERNAL_CALLS) {
                let call = self.tokens.remove(2);
                if let Some((caller, backend)) = call.split_once(EXTERNAL_CALL) {
                    self.push(format_label(caller), backend.to_string());
                }
                break;
            }
            self.pair();
        }
    }

    fn database_monitoring(&mut self) {
        self.named("collector");
        self.generic();
    }

    fn application(&mut self) {
        let Some(root) = self.tokens.first().cloned() else {
            return;
        };

        match root.as_str() {
            BACKENDS => {
                if let Some(call) = self.take() {
                    match call.strip_prefix(BACKEND_CALL) {
                        Some(backend) => self.push(
                            format_label(BACKEND_CALL.trim_end_matches(" - ")),
                            backend.to_string(),
                        ),
                        None => self.push("backend", call),
                    }
                }
            }
            SERVICE_ENDPOINTS => {
                self.named("tier");
                self.named("service_endpoint");
                self.individual_nodes();
            }
            OVERALL_PERFORMANCE => {
                if self.tokens.len() > 2 {
                    self.named("tier");
                    self.individual_nodes();
                    self.pairs_until_external_call();
                }
            }
            BUSINESS_TRANSACTIONS_ROOT => match self.peek() {
                Some(BT_GROUPS) => {
                    self.pair();
                }
                Some(BTS) => {
                    self.tokens.remove(1);
                    self.named("tier");
                    self.named("business_transaction");
                    self.individual_nodes();
                    self.pairs_until_external_call();
                }
                _ => self.generic(),
            },
            INFRASTRUCTURE => {
                self.named("tier");
                self.individual_nodes();
                self.generic();
            }
            _ => self.generic(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(p: &PathLabels) -> Vec<(&str, &str)> {
        p.labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    #[test]
    fn test_overall_application_performance() {
        let p = decompose(
            "Shop",
            "Overall Application Performance|web|Individual Nodes|web-1|Calls per Minute",
        );
        assert_eq!(
            pairs(&p),
            vec![
                ("application", "Shop"),
                ("tier", "web"),
                ("individual_node", "web-1"),
            ]
        );
        assert_eq!(p.profile, "overall_application_performance_calls_per_minute");
    }

    #[test]
    fn test_overall_without_tier() {
        let p = decompose("Shop", "Overall Application Performance|Calls per Minute");
        assert_eq!(pairs(&p), vec![("application", "Shop")]);
        assert_eq!(p.profile, "overall_application_performance_calls_per_minute");
    }

    #[test]
    fn test_external_call_ends_walk() {
        let p = decompose(
            "Shop",
            "Overall Application Performance|web|External Calls|web to Discovered backend call - db:5432|Average Response Time (ms)",
        );
        assert_eq!(
            pairs(&p),
            vec![("application", "Shop"), ("tier", "web"), ("web", "db:5432")]
        );
        assert_eq!(
            p.profile,
            "overall_application_performance_external_calls_average_response_time_ms"
        );
    }

    #[test]
    fn test_backends() {
        let p = decompose(
            "Shop",
            "Backends|Discovered backend call - cache:6379|Calls per Minute",
        );
        assert_eq!(
            pairs(&p),
            vec![("application", "Shop"), ("discovered_backend_call", "cache:6379")]
        );
        assert_eq!(p.profile, "backends_calls_per_minute");
    }

    #[test]
    fn test_service_endpoints() {
        let p = decompose(
            "Shop",
            "Service Endpoints|web|/checkout|Individual Nodes|web-2|Errors per Minute",
        );
        assert_eq!(
            pairs(&p),
            vec![
                ("application", "Shop"),
                ("tier", "web"),
                ("service_endpoint", "/checkout"),
                ("individual_node", "web-2"),
            ]
        );
        assert_eq!(p.profile, "service_endpoints_errors_per_minute");
    }

    #[test]
    fn test_business_transactions() {
        let p = decompose(
            "Shop",
            "Business Transaction Performance|Business Transactions|web|Checkout|Average Response Time (ms)",
        );
        assert_eq!(
            pairs(&p),
            vec![
                ("application", "Shop"),
                ("tier", "web"),
                ("business_transaction", "Checkout"),
            ]
        );
        assert_eq!(
            p.profile,
            "business_transaction_performance_average_response_time_ms"
        );

        let g = decompose(
            "Shop",
            "Business Transaction Performance|Business Transaction Groups|Payments|Calls per Minute",
        );
        assert_eq!(
            pairs(&g),
            vec![("application", "Shop"), ("business_transaction_group", "Payments")]
        );
    }

    #[test]
    fn test_infrastructure_generic_pairs() {
        let p = decompose(
            "Shop",
            "Application Infrastructure Performance|web|Hardware Resources|CPU|%Busy",
        );
        assert_eq!(
            pairs(&p),
            vec![
                ("application", "Shop"),
                ("tier", "web"),
                ("hardware_resource", "CPU"),
            ]
        );
        assert_eq!(
            p.profile,
            "application_infrastructure_performance_percent_busy"
        );
    }

    #[test]
    fn test_database_monitoring() {
        let p = decompose(
            DATABASE_MONITORING,
            "Databases|orders-db|KPI|Calls per Minute",
        );
        assert_eq!(pairs(&p), vec![("collector", "orders-db")]);
        assert_eq!(p.profile, "databases_kpi_calls_per_minute");
    }

    #[test]
    fn test_unknown_root_falls_back_to_generic() {
        let p = decompose("Shop", "Errors|Tiers|web|Exceptions per Minute");
        assert_eq!(pairs(&p), vec![("application", "Shop"), ("tier", "web")]);
        assert_eq!(p.profile, "errors_exceptions_per_minute");
    }
}
