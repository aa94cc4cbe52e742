//! Canonical JSON serialization for ledger hashing
//!
//! Hashes must be reproducible across nodes and serializer versions, so the
//! byte stream fed to SHA-256 is produced here rather than by `serde_json`
//! directly: object keys are sorted lexicographically at every nesting level
//! and timestamps use a fixed millisecond format.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Fixed timestamp layout used inside hashed payloads.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Format a UTC instant the way hashed payloads expect it.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Serialize a JSON value with object keys sorted at every nesting level.
///
/// Arrays keep their order; numbers render through `serde_json`'s canonical
/// `Display`, strings are JSON-escaped. The output carries no insignificant
/// whitespace.
pub fn stable_serialize(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // serde_json escapes exactly the way JSON requires; reuse it.
    out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_at_every_level() {
        let v = json!({"b": {"z": 1, "a": 2}, "a": [{"y": 1, "x": 2}]});
        assert_eq!(
            stable_serialize(&v),
            r#"{"a":[{"x":2,"y":1}],"b":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn test_string_escaping() {
        let v = json!({"k": "line\nbreak \"quoted\""});
        assert_eq!(stable_serialize(&v), r#"{"k":"line\nbreak \"quoted\""}"#);
    }

    #[test]
    fn test_timestamp_format_millisecond_precision() {
        let ts = DateTime::parse_from_rfc3339("2025-01-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(ts), "2025-01-01T08:00:00.000Z");
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let v = json!({"gamma": 1.5, "alpha": null, "beta": [true, false]});
        assert_eq!(stable_serialize(&v), stable_serialize(&v));
    }
}
