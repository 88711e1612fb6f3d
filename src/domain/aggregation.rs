//! Aggregation - Grouped Reductions for Stats-Style Sources
//!
//! Validates raw aggregation blocks into typed [`Aggregation`]s at job
//! build time and reduces grouped values at collection time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::AggregationError;

/// Raw `aggregation` block as written in a job definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationDef {
    /// Function names or integer percentiles. Defaults to `count`.
    #[serde(default)]
    pub funcs: Option<Vec<Value>>,
    /// Optional value filter.
    #[serde(default)]
    pub threshold: Option<ThresholdDef>,
}

/// Raw threshold block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDef {
    /// Comparison operator.
    #[serde(default)]
    pub operator: Option<String>,
    /// Numeric operand, as a number or a numeric string.
    #[serde(default)]
    pub value: Option<Value>,
}

/// Reduction applied to a group of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationFunc {
    /// Number of values.
    Count,
    /// Sum of values.
    Sum,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Arithmetic mean.
    Avg,
    /// Linear-interpolated percentile in 0..=100.
    Percentile(u8),
}

impl AggregationFunc {
    /// Parse a function name (`avg`, `average`, `count`, ...) or an integer
    /// percentile.
    pub fn parse(raw: &Value) -> Result<Self, AggregationError> {
        let text = match raw {
            Value::String(s) => s.trim().to_lowercase(),
            Value::Number(n) => n.to_string(),
            other => return Err(AggregationError::UnknownFunction(other.to_string())),
        };

        match text.as_str() {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "avg" | "average" => Ok(Self::Avg),
            _ => match text.parse::<i64>() {
                Ok(p) if (0..=100).contains(&p) => Ok(Self::Percentile(p as u8)),
                Ok(p) => Err(AggregationError::PercentileOutOfRange(p)),
                Err(_) => Err(AggregationError::UnknownFunction(text)),
            },
        }
    }

    /// Metric-name suffix for this function.
    pub fn suffix(&self) -> String {
        match self {
            Self::Count => "count".to_string(),
            Self::Sum => "sum".to_string(),
            Self::Min => "min".to_string(),
            Self::Max => "max".to_string(),
            Self::Avg => "avg".to_string(),
            Self::Percentile(p) => p.to_string(),
        }
    }

    /// Reduce `values`. Returns `None` when the function is undefined on
    /// an empty group (min, max and percentiles).
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        match self {
            Self::Count => Some(values.len() as f64),
            Self::Sum => Some(values.iter().sum()),
            Self::Avg => {
                if values.is_empty() {
                    Some(0.0)
                } else {
                    Some(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            Self::Min => values.iter().copied().reduce(f64::min),
            Self::Max => values.iter().copied().reduce(f64::max),
            Self::Percentile(p) => percentile(values, f64::from(*p)),
        }
    }
}

/// Linear interpolation between closest ranks.
fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let weight = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * weight)
}

/// Threshold comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThresholdOp {
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `=`
    Eq,
    /// `!=` or `<>`
    Ne,
}

impl ThresholdOp {
    /// Parse an operator token.
    pub fn parse(raw: &str) -> Result<Self, AggregationError> {
        match raw.trim() {
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Ge),
            "<=" => Ok(Self::Le),
            "=" | "==" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::Ne),
            other => Err(AggregationError::UnknownOperator(other.to_string())),
        }
    }
}

/// Values pass when `value <op> operand` holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Threshold {
    /// Operator.
    pub op: ThresholdOp,
    /// Right-hand operand.
    pub value: f64,
}

impl Threshold {
    /// Whether `value` passes the filter.
    pub fn matches(&self, value: f64) -> bool {
        match self.op {
            ThresholdOp::Gt => value > self.value,
            ThresholdOp::Lt => value < self.value,
            ThresholdOp::Ge => value >= self.value,
            ThresholdOp::Le => value <= self.value,
            ThresholdOp::Eq => (value - self.value).abs() < f64::EPSILON,
            ThresholdOp::Ne => (value - self.value).abs() >= f64::EPSILON,
        }
    }

    fn parse(def: &ThresholdDef) -> Result<Self, AggregationError> {
        let op = def
            .operator
            .as_deref()
            .ok_or(AggregationError::MissingOperator)
            .and_then(ThresholdOp::parse)?;

        let value = match def.value.as_ref().ok_or(AggregationError::MissingValue)? {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| AggregationError::InvalidValue(n.to_string()))?,
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| AggregationError::InvalidValue(s.clone()))?,
            other => return Err(AggregationError::InvalidValue(other.to_string())),
        };

        Ok(Self { op, value })
    }
}

/// Validated aggregation: functions plus an optional filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    /// Functions, in configured order.
    pub funcs: Vec<AggregationFunc>,
    /// Optional value filter.
    pub threshold: Option<Threshold>,
}

impl Default for Aggregation {
    fn default() -> Self {
        Self {
            funcs: vec![AggregationFunc::Count],
            threshold: None,
        }
    }
}

impl Aggregation {
    /// Validate a raw definition.
    pub fn parse(def: &AggregationDef) -> Result<Self, AggregationError> {
        let funcs = match def.funcs.as_deref() {
            None | Some([]) => vec![AggregationFunc::Count],
            Some(raw) => raw
                .iter()
                .map(AggregationFunc::parse)
                .collect::<Result<Vec<_>, _>>()?,
        };
        let threshold = def.threshold.as_ref().map(Threshold::parse).transpose()?;

        Ok(Self { funcs, threshold })
    }

    /// Whether `value` should be kept in its group.
    pub fn accepts(&self, value: f64) -> bool {
        self.threshold.is_none_or(|t| t.matches(value))
    }
}
