//! Filter Sanitization
//!
//! Report filters are opaque key/value predicates forwarded to the source
//! store. The store interprets keys starting with `$` as operators and
//! keys containing `.` as path traversals; neither may originate from
//! untrusted input. `sanitize_filters` drops both, recursively, and keeps
//! everything else intact.
//!
//! Arrays are never reinterpreted as objects: a sequence value passes
//! through unchanged even if its elements are objects.

use serde_json::Value;

use crate::row::Row;

/// Strip operator and path-traversal keys from a filter mapping.
///
/// Non-object input yields an empty mapping.
pub fn sanitize_filters(filters: &Value) -> Row {
    match filters {
        Value::Object(map) => sanitize_object(map),
        _ => Row::new(),
    }
}

fn sanitize_object(map: &Row) -> Row {
    let mut out = Row::new();
    for (key, value) in map {
        if key.starts_with('$') || key.contains('.') {
            continue;
        }
        let child = match value {
            Value::Object(inner) => Value::Object(sanitize_object(inner)),
            other => other.clone(),
        };
        out.insert(key.clone(), child);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sanitize(v: Value) -> Value {
        Value::Object(sanitize_filters(&v))
    }

    #[test]
    fn test_operator_keys_are_dropped() {
        assert_eq!(
            sanitize(json!({"$where": "1 == 1", "status": "paid"})),
            json!({"status": "paid"})
        );
    }

    #[test]
    fn test_dotted_keys_are_dropped() {
        assert_eq!(
            sanitize(json!({"a.b": 1, "region": "br"})),
            json!({"region": "br"})
        );
    }

    #[test]
    fn test_nested_objects_are_sanitized_recursively() {
        assert_eq!(
            sanitize(json!({"customer": {"$gt": 5, "tier": "gold", "x.y": 1}})),
            json!({"customer": {"tier": "gold"}})
        );
    }

    #[test]
    fn test_arrays_pass_through_unchanged() {
        let v = json!({"tags": [{"$bad": 1}, "ok"]});
        assert_eq!(sanitize(v.clone()), v);
    }

    #[test]
    fn test_non_object_input_yields_empty_mapping() {
        for v in [json!(null), json!([1, 2]), json!("x"), json!(9)] {
            assert_eq!(sanitize(v), json!({}));
        }
    }

    #[test]
    fn test_output_never_contains_unsafe_keys() {
        let v = json!({
            "$or": [],
            "ok": {"deep": {"$in": [1], "fine": true, "no.pe": 2}},
            "also.bad": 3
        });
        let out = sanitize_filters(&v);
        fn assert_clean(map: &Row) {
            for (k, v) in map {
                assert!(!k.starts_with('$') && !k.contains('.'), "unsafe key {k}");
                if let Value::Object(inner) = v {
                    assert_clean(inner);
                }
            }
        }
        assert_clean(&out);
        assert_eq!(Value::Object(out), json!({"ok": {"deep": {"fine": true}}}));
    }
}
