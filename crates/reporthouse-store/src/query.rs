//! Filter-to-SQL compilation for source collections.
//!
//! Filters are sanitized key → value equality predicates. Scalars
//! compare against `json_extract(doc, path)` directly; object and array
//! values compare as whole JSON (exact equality, the document-store
//! semantics for non-scalar filter values). JSON paths are bound as
//! parameters, never interpolated.

use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite};

use reporthouse_core::Row;
use reporthouse_reduce::spec::is_identifier;

/// Build the JSON path for a top-level document key.
///
/// Identifier-safe keys use the bare `$.key` form; anything else is
/// quoted. Keys containing a double quote cannot be expressed in the
/// path syntax and yield `None` (the caller matches nothing for them).
pub(crate) fn json_path(key: &str) -> Option<String> {
    if is_identifier(key) {
        Some(format!("$.{key}"))
    } else if !key.contains('"') {
        Some(format!("$.\"{key}\""))
    } else {
        None
    }
}

/// Append `AND json_extract(doc, ?) = ?` predicates for every filter key.
pub(crate) fn push_filter_predicates(qb: &mut QueryBuilder<'_, Sqlite>, filters: &Row) {
    for (key, value) in filters {
        let Some(path) = json_path(key) else {
            qb.push(" AND 0 = 1");
            continue;
        };
        match value {
            Value::Null => {
                qb.push(" AND json_extract(doc, ");
                qb.push_bind(path);
                qb.push(") IS NULL");
            }
            Value::Bool(b) => {
                qb.push(" AND json_extract(doc, ");
                qb.push_bind(path);
                qb.push(") = ");
                qb.push_bind(i64::from(*b));
            }
            Value::Number(n) => {
                qb.push(" AND json_extract(doc, ");
                qb.push_bind(path);
                qb.push(") = ");
                if let Some(i) = n.as_i64() {
                    qb.push_bind(i);
                } else {
                    qb.push_bind(n.as_f64().unwrap_or(f64::NAN));
                }
            }
            Value::String(s) => {
                qb.push(" AND json_extract(doc, ");
                qb.push_bind(path);
                qb.push(") = ");
                qb.push_bind(s.clone());
            }
            other => {
                qb.push(" AND json_extract(doc, ");
                qb.push_bind(path);
                qb.push(") = json(");
                qb.push_bind(other.to_string());
                qb.push(")");
            }
        }
    }
}
