//! Canonical JSON for hashed objects
//!
//! Every JSON value that feeds a hash goes through this module first, so the
//! digest is a function of content rather than serialization accidents.
//! Rules, applied recursively:
//!
//! 1. Strings are NFC-normalized.
//! 2. Object keys whose value is null or the empty string are dropped.
//! 3. Object keys sort lexicographically (byte order).
//! 4. Arrays of primitive strings/numbers sort.
//! 5. ISO-looking strings re-parse to ISO-8601 UTC with millisecond precision.
//! 6. Integers pass through; other numbers truncate to 10 decimal places.
//! 7. Output is compact JSON; a top-level object gains a `_schema` key.
//!
//! The transform is idempotent: `canon(canon(x)) == canon(x)` byte-for-byte.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use super::hash::{keccak256, Hash256};

/// Version stamped into the top-level `_schema` key
pub const SCHEMA_VERSION: i64 = 1;

/// Canonicalize a JSON value to its compact string form.
pub fn canonical_json(value: &Value) -> String {
    let mut normalized = normalize(value).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut normalized {
        map.entry("_schema".to_string())
            .or_insert_with(|| Value::Number(SCHEMA_VERSION.into()));
    }
    let mut out = String::new();
    write_value(&normalized, &mut out);
    out
}

/// Keccak-256 of the canonical form.
pub fn canonical_json_hash(value: &Value) -> Hash256 {
    keccak256(canonical_json(value).as_bytes())
}

/// Recursively normalize; `None` means "drop this object entry".
fn normalize(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Value::Bool(*b)),
        Value::Number(n) => Some(Value::Number(normalize_number(n))),
        Value::String(s) => {
            let s = normalize_string(s);
            if s.is_empty() {
                None
            } else {
                Some(Value::String(s))
            }
        }
        Value::Array(items) => {
            let mut normalized: Vec<Value> = items
                .iter()
                .map(|item| normalize(item).unwrap_or(Value::Null))
                .collect();
            if normalized
                .iter()
                .all(|v| matches!(v, Value::String(_) | Value::Number(_)))
            {
                normalized.sort_by(compare_primitives);
            }
            Some(Value::Array(normalized))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, entry) in map {
                if let Some(normalized) = normalize(entry) {
                    out.insert(normalize_string(key), normalized);
                }
            }
            Some(Value::Object(out))
        }
    }
}

fn normalize_string(input: &str) -> String {
    let nfc: String = input.nfc().collect();
    if let Some(iso) = reparse_iso_date(&nfc) {
        return iso;
    }
    nfc
}

/// Re-parse strings that look like timestamps so `2023-1-1` vs
/// `2023-01-01T00:00:00+00:00` cannot produce different digests.
fn reparse_iso_date(input: &str) -> Option<String> {
    if input.len() < 10 || !looks_like_date(input) {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
    if input.len() == 10 {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(input, "%Y-%m-%d") {
            let dt = date.and_hms_opt(0, 0, 0)?.and_utc();
            return Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true));
        }
    }
    None
}

fn looks_like_date(input: &str) -> bool {
    let bytes = input.as_bytes();
    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
        && (bytes.len() == 10 || bytes[10] == b'T' || bytes[10] == b' ')
}

fn normalize_number(n: &serde_json::Number) -> serde_json::Number {
    if n.is_i64() || n.is_u64() {
        return n.clone();
    }
    let f = n.as_f64().unwrap_or(0.0);
    let truncated = (f * 1e10).trunc() / 1e10;
    serde_json::Number::from_f64(truncated).unwrap_or_else(|| serde_json::Number::from(0))
}

fn compare_primitives(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        // Numbers sort before strings so mixed arrays stay deterministic.
        (Value::Number(_), Value::String(_)) => Ordering::Less,
        (Value::String(_), Value::Number(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Serializer with explicit key ordering, independent of the `serde_json`
/// map representation.
fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"))
        }
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
                out.push_str(&serde_json::to_string(key).expect("key serialization is infallible"));
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
    }
}
