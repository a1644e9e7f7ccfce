//! Value Normalization
//!
//! The source store hands rows over as extended JSON: native identifiers
//! arrive as `{"$oid": "<24 hex>"}` and timestamps as `{"$date": <epoch
//! ms>}` or `{"$date": "<RFC 3339>"}`. Artifacts must carry portable
//! scalars only, so `normalize` collapses the wrappers:
//!
//! - identifier wrapper → its canonical 24-hex string
//! - timestamp wrapper → ISO-8601 UTC with millisecond precision
//! - arrays → normalized element-wise
//! - objects → normalized value-wise, keys preserved
//! - everything else passes through unchanged
//!
//! `normalize` is idempotent: normalizing an already-normalized value is
//! the identity.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

use crate::id::RowId;

const OID_KEY: &str = "$oid";
const DATE_KEY: &str = "$date";

/// Recursively convert store-native values to portable scalars.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(oid) = map.get(OID_KEY).and_then(Value::as_str) {
                    if let Ok(id) = RowId::parse_str(oid) {
                        return Value::String(id.to_hex());
                    }
                }
                if let Some(date) = map.get(DATE_KEY) {
                    if let Some(iso) = normalize_date(date) {
                        return Value::String(iso);
                    }
                }
            }
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, child) in map {
                out.insert(key.clone(), normalize(child));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2026-08-02T09:30:00.000Z`.
pub fn to_iso_millis(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn normalize_date(raw: &Value) -> Option<String> {
    match raw {
        Value::Number(n) => {
            let ms = n.as_i64()?;
            Utc.timestamp_millis_opt(ms).single().map(to_iso_millis)
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| to_iso_millis(dt.with_timezone(&Utc))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifier_wrapper_becomes_hex_string() {
        let v = json!({"$oid": "64b1f0aa12cd34ef56ab78a6"});
        assert_eq!(normalize(&v), json!("64b1f0aa12cd34ef56ab78a6"));
    }

    #[test]
    fn test_epoch_millis_become_iso() {
        let v = json!({"$date": 1_700_000_000_000i64});
        assert_eq!(normalize(&v), json!("2023-11-14T22:13:20.000Z"));
    }

    #[test]
    fn test_rfc3339_date_is_rendered_in_utc_millis() {
        let v = json!({"$date": "2026-08-02T11:30:00+02:00"});
        assert_eq!(normalize(&v), json!("2026-08-02T09:30:00.000Z"));
    }

    #[test]
    fn test_nested_containers_normalize_element_wise() {
        let v = json!({
            "ids": [{"$oid": "64b1f0aa12cd34ef56ab78a6"}, "plain"],
            "meta": {"createdAt": {"$date": 0}}
        });
        assert_eq!(
            normalize(&v),
            json!({
                "ids": ["64b1f0aa12cd34ef56ab78a6", "plain"],
                "meta": {"createdAt": "1970-01-01T00:00:00.000Z"}
            })
        );
    }

    #[test]
    fn test_scalars_pass_through() {
        for v in [json!(42), json!("text"), json!(true), json!(null), json!(1.5)] {
            assert_eq!(normalize(&v), v);
        }
    }

    #[test]
    fn test_malformed_wrappers_are_left_as_objects() {
        let bad_oid = json!({"$oid": "not-hex"});
        assert_eq!(normalize(&bad_oid), bad_oid);
        let bad_date = json!({"$date": true});
        assert_eq!(normalize(&bad_date), bad_date);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let cases = [
            json!({"$oid": "64b1f0aa12cd34ef56ab78a6"}),
            json!({"$date": 1_700_000_000_000i64}),
            json!({"a": [{"$date": 0}], "b": {"c": {"$oid": "64b1f0aa12cd34ef56ab78a6"}}}),
            json!([1, "two", null]),
        ];
        for v in cases {
            let once = normalize(&v);
            assert_eq!(normalize(&once), once);
        }
    }
}
