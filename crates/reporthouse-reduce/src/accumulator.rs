//! Streaming group accumulator.
//!
//! Folds per-range partial groups into final groups. The group key is the
//! canonical JSON of the `{groupBy[i] → value}` mapping with fields in
//! `groupBy` order; groups are kept in a `BTreeMap` keyed by that string,
//! so finalization emits rows in ascending canonical-JSON order without a
//! separate sort. Identical inputs therefore produce identical outputs.

use std::collections::{BTreeMap, HashMap};

use chrono::DateTime;
use serde_json::Value;

use reporthouse_core::Row;

use crate::error::{ReduceError, Result};
use crate::spec::{avg_count_alias, avg_sum_alias, MetricOp, ReduceSpec, INPUT_COUNT_FIELD};

/// Projection used to compare min/max candidates across partials.
///
/// Timestamps become epoch milliseconds; numbers and strings compare
/// natively; numbers order before strings (the source store's type
/// bracket order); anything else is not comparable and is skipped.
#[derive(Debug, Clone, PartialEq)]
enum Comparable {
    Num(f64),
    Str(String),
}

impl Comparable {
    fn project(value: &Value) -> Option<Comparable> {
        match value {
            Value::Number(n) => n.as_f64().map(Comparable::Num),
            Value::String(s) => Some(
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| Comparable::Num(dt.timestamp_millis() as f64))
                    .unwrap_or_else(|_| Comparable::Str(s.clone())),
            ),
            _ => None,
        }
    }

    fn cmp_with(&self, other: &Comparable) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Comparable::Num(a), Comparable::Num(b)) => a.total_cmp(b),
            (Comparable::Str(a), Comparable::Str(b)) => a.cmp(b),
            (Comparable::Num(_), Comparable::Str(_)) => Ordering::Less,
            (Comparable::Str(_), Comparable::Num(_)) => Ordering::Greater,
        }
    }
}

#[derive(Debug)]
struct GroupState {
    group: Row,
    /// Running numeric totals for count/sum metrics.
    sums: HashMap<String, f64>,
    /// Current winner per min/max metric, with its comparison projection.
    extremes: HashMap<String, (Comparable, Value)>,
    /// Per-avg-alias (sum, non-null count) pairs.
    avg_pairs: HashMap<String, (f64, i64)>,
    input_count: u64,
}

impl GroupState {
    fn new(group: Row) -> Self {
        Self {
            group,
            sums: HashMap::new(),
            extremes: HashMap::new(),
            avg_pairs: HashMap::new(),
            input_count: 0,
        }
    }
}

/// The finalized reduce output.
#[derive(Debug)]
pub struct Finalized {
    pub rows: Vec<Row>,
    pub rows_in: u64,
    pub rows_out: u64,
}

/// Folds partial group rows into final groups, bounded by `max_groups`.
#[derive(Debug)]
pub struct Accumulator {
    spec: ReduceSpec,
    max_groups: usize,
    groups: BTreeMap<String, GroupState>,
}

impl Accumulator {
    pub fn new(spec: ReduceSpec, max_groups: usize) -> Self {
        Self { spec, max_groups, groups: BTreeMap::new() }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Fold one partial group row into the accumulator.
    pub fn consume(&mut self, partial: &Row) -> Result<()> {
        let mut group = Row::new();
        for field in &self.spec.group_by {
            group.insert(
                field.clone(),
                partial.get(field).cloned().unwrap_or(Value::Null),
            );
        }
        let key = serde_json::to_string(&group)?;

        if !self.groups.contains_key(&key) && self.groups.len() >= self.max_groups {
            return Err(ReduceError::CardinalityExceeded { max: self.max_groups });
        }
        let state = self
            .groups
            .entry(key)
            .or_insert_with(|| GroupState::new(group));

        for metric in &self.spec.metrics {
            match metric.op {
                MetricOp::Count | MetricOp::Sum => {
                    if let Some(v) = partial.get(&metric.alias).and_then(Value::as_f64) {
                        *state.sums.entry(metric.alias.clone()).or_insert(0.0) += v;
                    }
                }
                MetricOp::Min | MetricOp::Max => {
                    let candidate = partial.get(&metric.alias).unwrap_or(&Value::Null);
                    if let Some(projected) = Comparable::project(candidate) {
                        let keep_candidate = match state.extremes.get(&metric.alias) {
                            None => true,
                            Some((current, _)) => {
                                let ord = projected.cmp_with(current);
                                match metric.op {
                                    MetricOp::Min => ord.is_lt(),
                                    _ => ord.is_gt(),
                                }
                            }
                        };
                        if keep_candidate {
                            state
                                .extremes
                                .insert(metric.alias.clone(), (projected, candidate.clone()));
                        }
                    }
                }
                MetricOp::Avg => {
                    let sum = partial
                        .get(&avg_sum_alias(&metric.alias))
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0);
                    let count = partial
                        .get(&avg_count_alias(&metric.alias))
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    let pair = state.avg_pairs.entry(metric.alias.clone()).or_insert((0.0, 0));
                    pair.0 += sum;
                    pair.1 += count;
                }
            }
        }

        state.input_count += partial
            .get(INPUT_COUNT_FIELD)
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(())
    }

    /// Emit one flattened row per group, in ascending group-key order.
    pub fn finalize(self) -> Finalized {
        let mut rows = Vec::with_capacity(self.groups.len());
        let mut rows_in = 0u64;
        let rows_out = self.groups.len() as u64;

        for state in self.groups.into_values() {
            rows_in += state.input_count;
            let mut row = state.group;
            for metric in &self.spec.metrics {
                let value = match metric.op {
                    MetricOp::Count | MetricOp::Sum => state
                        .sums
                        .get(&metric.alias)
                        .map(|v| json_number(*v))
                        .unwrap_or(Value::Null),
                    MetricOp::Min | MetricOp::Max => state
                        .extremes
                        .get(&metric.alias)
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Null),
                    MetricOp::Avg => match state.avg_pairs.get(&metric.alias) {
                        Some((_, 0)) | None => Value::Null,
                        Some((sum, count)) => json_number(sum / *count as f64),
                    },
                };
                row.insert(metric.alias.clone(), value);
            }
            rows.push(row);
        }

        Finalized { rows, rows_in, rows_out }
    }
}

/// Serial merge of buffered partial rows (the non-streaming fold path).
pub fn reduce_partition_rows(
    spec: &ReduceSpec,
    partials: &[Row],
    max_groups: usize,
) -> Result<Finalized> {
    let mut acc = Accumulator::new(spec.clone(), max_groups);
    for partial in partials {
        acc.consume(partial)?;
    }
    Ok(acc.finalize())
}

/// Render an f64 as an integer JSON number when it is one.
fn json_number(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= 9_007_199_254_740_992.0 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
