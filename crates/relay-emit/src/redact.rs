//! Secret redaction for log fields.
//!
//! A field is secret when its key, compared case-insensitively, ends in
//! `_TOKEN`, `_KEY` or `_SECRET`. Only suffixes count: a bare `key` or
//! `token` is left alone, while `api_key_token` is redacted. Nested objects
//! and arrays are walked recursively.

use serde_json::{Map, Value};

pub const REDACTED: &str = "[REDACTED]";

const SECRET_SUFFIXES: [&str; 3] = ["_token", "_key", "_secret"];

pub fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Return a copy of `fields` with every secret value replaced by
/// `[REDACTED]`.
pub fn redact_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| {
            let value = if is_secret_key(key) {
                Value::String(REDACTED.to_string())
            } else {
                redact_value(value)
            };
            (key.clone(), value)
        })
        .collect()
}

fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(nested) => Value::Object(redact_fields(nested)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}
