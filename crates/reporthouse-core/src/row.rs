//! Report rows.
//!
//! A row is an insertion-ordered JSON object. Order matters: the first
//! row a generator sees defines the header/schema of the whole artifact,
//! and the reduce engine's canonical group key serializes fields in
//! `group_by` order. `serde_json` is built with `preserve_order` so the
//! map keeps the order keys were inserted in.

use serde_json::Value;

/// One report row.
pub type Row = serde_json::Map<String, Value>;

/// The identifier field injected into every raw-mode row.
pub const ID_FIELD: &str = "_id";

/// Collects the header keys of a row in its stored order.
pub fn row_keys(row: &Row) -> Vec<String> {
    row.keys().cloned().collect()
}
