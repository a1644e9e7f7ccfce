//! Reduce and partition specifications.
//!
//! A `ReduceSpec` is an ordered `groupBy` field list plus a non-empty
//! metric list. Aliases and field names are restricted to
//! `[A-Za-z0-9_]+` so they can never smuggle operators or path
//! traversals into the pushed-down aggregation.

use serde::{Deserialize, Serialize};

use crate::error::{ReduceError, Result};

/// Partial-row field carrying the per-group input row count.
pub const INPUT_COUNT_FIELD: &str = "__input_count";

/// The partitioning strategy this engine implements.
pub const IDENTIFIER_RANGE_STRATEGY: &str = "identifierRange";

/// Grouped-aggregation specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReduceSpec {
    #[serde(default)]
    pub group_by: Vec<String>,
    pub metrics: Vec<Metric>,
}

/// One output metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub op: MetricOp,
    /// Source field; required unless `op` is `count`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Output alias the metric value is emitted under.
    #[serde(rename = "as")]
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricOp {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

/// Partitioning hint for the identifier-range strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSpec {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<u32>,
}

fn default_strategy() -> String {
    IDENTIFIER_RANGE_STRATEGY.to_string()
}

impl Default for PartitionSpec {
    fn default() -> Self {
        Self { strategy: default_strategy(), chunks: None }
    }
}

impl PartitionSpec {
    pub fn validate(&self) -> Result<()> {
        if self.strategy != IDENTIFIER_RANGE_STRATEGY {
            return Err(ReduceError::Validation(format!(
                "unknown partition strategy '{}'",
                self.strategy
            )));
        }
        if self.chunks == Some(0) {
            return Err(ReduceError::Validation("chunks must be positive".into()));
        }
        Ok(())
    }
}

/// `[A-Za-z0-9_]+`
pub fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl ReduceSpec {
    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(ReduceError::Validation("metrics must not be empty".into()));
        }
        for field in &self.group_by {
            if !is_identifier(field) {
                return Err(ReduceError::Validation(format!(
                    "invalid groupBy field '{field}'"
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for metric in &self.metrics {
            if !is_identifier(&metric.alias) {
                return Err(ReduceError::Validation(format!(
                    "invalid metric alias '{}'",
                    metric.alias
                )));
            }
            if !seen.insert(metric.alias.as_str()) {
                return Err(ReduceError::Validation(format!(
                    "duplicate metric alias '{}'",
                    metric.alias
                )));
            }
            match (&metric.op, &metric.field) {
                (MetricOp::Count, _) => {}
                (_, Some(field)) if is_identifier(field) => {}
                (_, Some(field)) => {
                    return Err(ReduceError::Validation(format!(
                        "invalid metric field '{field}'"
                    )));
                }
                (op, None) => {
                    return Err(ReduceError::Validation(format!(
                        "metric '{}' with op {op:?} requires a field",
                        metric.alias
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Avg metrics travel as a sum/count pair under mangled partial aliases.
pub fn avg_sum_alias(alias: &str) -> String {
    format!("__avg_sum__{alias}")
}

pub fn avg_count_alias(alias: &str) -> String {
    format!("__avg_count__{alias}")
}

/// A pushed-down per-group accumulation expression.
///
/// The source store compiles these into its native group stage; the
/// engine stays ignorant of the store's query dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum AccumExpr {
    /// `alias = count of rows in the group`
    CountAll { alias: String },
    /// `alias = sum(field)`
    Sum { field: String, alias: String },
    /// `alias = min(field)`
    Min { field: String, alias: String },
    /// `alias = max(field)`
    Max { field: String, alias: String },
    /// `alias = count of rows where field is not null`
    CountNotNull { field: String, alias: String },
}

/// Compile the per-range partial accumulations for a spec, including the
/// avg sum/count pairs and the trailing `__input_count`.
pub fn partial_accums(spec: &ReduceSpec) -> Vec<AccumExpr> {
    let mut accums = Vec::with_capacity(spec.metrics.len() + 1);
    for metric in &spec.metrics {
        match (&metric.op, &metric.field) {
            (MetricOp::Count, _) => {
                accums.push(AccumExpr::CountAll { alias: metric.alias.clone() });
            }
            (MetricOp::Sum, Some(field)) => accums.push(AccumExpr::Sum {
                field: field.clone(),
                alias: metric.alias.clone(),
            }),
            (MetricOp::Min, Some(field)) => accums.push(AccumExpr::Min {
                field: field.clone(),
                alias: metric.alias.clone(),
            }),
            (MetricOp::Max, Some(field)) => accums.push(AccumExpr::Max {
                field: field.clone(),
                alias: metric.alias.clone(),
            }),
            (MetricOp::Avg, Some(field)) => {
                accums.push(AccumExpr::Sum {
                    field: field.clone(),
                    alias: avg_sum_alias(&metric.alias),
                });
                accums.push(AccumExpr::CountNotNull {
                    field: field.clone(),
                    alias: avg_count_alias(&metric.alias),
                });
            }
            // validate() rejects these before the engine runs
            (_, None) => {}
        }
    }
    accums.push(AccumExpr::CountAll { alias: INPUT_COUNT_FIELD.to_string() });
    accums
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(op: MetricOp, field: Option<&str>, alias: &str) -> Metric {
        Metric { op, field: field.map(String::from), alias: alias.to_string() }
    }

    #[test]
    fn test_valid_spec_passes() {
        let spec = ReduceSpec {
            group_by: vec!["status".into()],
            metrics: vec![
                metric(MetricOp::Count, None, "totalOrders"),
                metric(MetricOp::Sum, Some("amount"), "sumAmount"),
            ],
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_empty_metrics_rejected() {
        let spec = ReduceSpec { group_by: vec![], metrics: vec![] };
        assert!(matches!(spec.validate(), Err(ReduceError::Validation(_))));
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let spec = ReduceSpec {
            group_by: vec![],
            metrics: vec![
                metric(MetricOp::Count, None, "x"),
                metric(MetricOp::Sum, Some("amount"), "x"),
            ],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_non_count_without_field_rejected() {
        let spec = ReduceSpec {
            group_by: vec![],
            metrics: vec![metric(MetricOp::Min, None, "lowest")],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_bad_identifiers_rejected() {
        for bad in ["a.b", "a$b", "", "a b"] {
            let spec = ReduceSpec {
                group_by: vec![bad.into()],
                metrics: vec![metric(MetricOp::Count, None, "n")],
            };
            assert!(spec.validate().is_err(), "groupBy '{bad}' should fail");
        }
    }

    #[test]
    fn test_count_ignores_field() {
        let spec = ReduceSpec {
            group_by: vec![],
            metrics: vec![metric(MetricOp::Count, Some("whatever"), "n")],
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_avg_compiles_to_sum_count_pair() {
        let spec = ReduceSpec {
            group_by: vec!["g".into()],
            metrics: vec![metric(MetricOp::Avg, Some("amount"), "avgAmount")],
        };
        let accums = partial_accums(&spec);
        assert_eq!(
            accums,
            vec![
                AccumExpr::Sum { field: "amount".into(), alias: "__avg_sum__avgAmount".into() },
                AccumExpr::CountNotNull {
                    field: "amount".into(),
                    alias: "__avg_count__avgAmount".into()
                },
                AccumExpr::CountAll { alias: INPUT_COUNT_FIELD.into() },
            ]
        );
    }

    #[test]
    fn test_alias_serde_uses_as() {
        let json = r#"{"op":"sum","field":"amount","as":"sumAmount"}"#;
        let m: Metric = serde_json::from_str(json).unwrap();
        assert_eq!(m.alias, "sumAmount");
        assert_eq!(serde_json::to_value(&m).unwrap()["as"], "sumAmount");
    }

    #[test]
    fn test_partition_spec_validation() {
        assert!(PartitionSpec::default().validate().is_ok());
        let bad = PartitionSpec { strategy: "hash".into(), chunks: None };
        assert!(bad.validate().is_err());
        let zero = PartitionSpec { strategy: IDENTIFIER_RANGE_STRATEGY.into(), chunks: Some(0) };
        assert!(zero.validate().is_err());
    }
}
