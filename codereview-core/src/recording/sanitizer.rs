use http::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;

/// Headers whose values must never reach the recording log.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "proxy-authorization",
    "set-cookie",
    "x-goog-api-key",
];

/// JSON keys redacted wherever they appear in a recorded body.
const SENSITIVE_KEYS: &[&str] = &["api_key", "apiKey", "key", "password", "secret", "token"];

const REDACTED: &str = "[REDACTED]";

pub struct Sanitizer;

impl Sanitizer {
    pub fn is_sensitive_header(header_name: &str) -> bool {
        let lower = header_name.to_lowercase();
        SENSITIVE_HEADERS.contains(&lower.as_str())
    }

    /// Copy printable headers into a map, redacting sensitive ones.
    pub fn sanitize_headers(headers: &HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                let value = if Self::is_sensitive_header(name.as_str()) {
                    REDACTED.to_string()
                } else {
                    value.to_string()
                };
                Some((name.to_string(), value))
            })
            .collect()
    }

    pub fn sanitize_json(value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, val)| {
                        let val = if SENSITIVE_KEYS.contains(&key.as_str()) {
                            Value::String(REDACTED.to_string())
                        } else {
                            Self::sanitize_json(val)
                        };
                        (key.clone(), val)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(Self::sanitize_json).collect()),
            _ => value.clone(),
        }
    }
}
