//! Deep sensitive-data redaction for captured network traffic.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

pub const REDACTED: &str = "[REDACTED]";

/// Body keys that get their string values replaced during recursive JSON
/// redaction.
static SENSITIVE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)password|token|secret|auth|credential|session|cookie|csrf|api_key|access_token|refresh_token|bearer|authorization",
    )
    .expect("sensitive key pattern is valid")
});

/// Fallback substitutions for bodies that are not JSON.
static TEXT_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?i)\bbearer\s+[a-zA-Z0-9+/=._-]+").expect("bearer pattern is valid"),
            "Bearer [REDACTED]",
        ),
        (
            Regex::new(r#"(?i)\b(token|key|password|secret)["']?\s*[=:]\s*["']?[^\s"'&;,]+"#)
                .expect("assignment pattern is valid"),
            "$1=[REDACTED]",
        ),
    ]
});

pub const DEFAULT_SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "bearer",
    "x-csrf-token",
    "x-session-id",
    "x-access-token",
];

pub struct Redactor {
    sensitive_headers: HashSet<String>,
}

impl Redactor {
    pub fn new(sensitive_headers: impl IntoIterator<Item = String>) -> Self {
        Self {
            sensitive_headers: sensitive_headers
                .into_iter()
                .map(|h| h.to_lowercase())
                .collect(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SENSITIVE_HEADERS.iter().map(|s| s.to_string()))
    }

    /// Replace the values of sensitive headers in place.
    pub fn redact_headers(&self, headers: &mut HashMap<String, String>) {
        for (name, value) in headers.iter_mut() {
            if self.sensitive_headers.contains(&name.to_lowercase()) {
                *value = REDACTED.to_string();
            }
        }
    }

    /// Redact a captured body: JSON bodies get recursive key-based
    /// redaction, anything else goes through the text substitutions.
    pub fn redact_body(&self, body: &str) -> String {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(mut value) => {
                redact_json(&mut value);
                value.to_string()
            }
            Err(_) => {
                let mut out = body.to_string();
                for (pattern, replacement) in TEXT_PATTERNS.iter() {
                    out = pattern.replace_all(&out, *replacement).to_string();
                }
                out
            }
        }
    }
}

/// Recursive JSON redaction: only string values under sensitive keys are
/// replaced; objects and arrays recurse regardless of key.
fn redact_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                match v {
                    serde_json::Value::String(s) if SENSITIVE_KEY.is_match(key) => {
                        *s = REDACTED.to_string();
                    }
                    _ => redact_json(v),
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                redact_json(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn sensitive_headers_are_replaced_case_insensitively() {
        let redactor = Redactor::with_defaults();
        let mut h = headers(&[
            ("Authorization", "Bearer abc"),
            ("Content-Type", "application/json"),
            ("X-API-Key", "k-123"),
        ]);
        redactor.redact_headers(&mut h);
        assert_eq!(h.get("Authorization").unwrap(), REDACTED);
        assert_eq!(h.get("X-API-Key").unwrap(), REDACTED);
        assert_eq!(h.get("Content-Type").unwrap(), "application/json");
    }

    #[test]
    fn json_bodies_are_redacted_recursively() {
        let redactor = Redactor::with_defaults();
        let body = serde_json::json!({
            "user": {
                "name": "jane",
                "password": "hunter2",
                "settings": {"api_key": "k-1", "theme": "dark"}
            },
            "items": [{"refresh_token": "r-1"}]
        })
        .to_string();
        let redacted: serde_json::Value =
            serde_json::from_str(&redactor.redact_body(&body)).unwrap();
        assert_eq!(redacted["user"]["password"], REDACTED);
        assert_eq!(redacted["user"]["settings"]["api_key"], REDACTED);
        assert_eq!(redacted["items"][0]["refresh_token"], REDACTED);
        assert_eq!(redacted["user"]["name"], "jane");
        assert_eq!(redacted["user"]["settings"]["theme"], "dark");
    }

    #[test]
    fn only_string_values_are_replaced() {
        let redactor = Redactor::with_defaults();
        let body = serde_json::json!({"auth": {"token": "t", "attempts": 3}}).to_string();
        let redacted: serde_json::Value =
            serde_json::from_str(&redactor.redact_body(&body)).unwrap();
        // "auth" holds an object: recursed into, not replaced.
        assert_eq!(redacted["auth"]["token"], REDACTED);
        assert_eq!(redacted["auth"]["attempts"], 3);
    }

    #[test]
    fn opaque_bodies_get_pattern_substitution() {
        let redactor = Redactor::with_defaults();
        let out = redactor.redact_body("grant=1&token=abcdef&name=jane");
        assert!(out.contains("token=[REDACTED]"));
        assert!(out.contains("name=jane"));

        let out = redactor.redact_body("Authorization: Bearer abc.def.ghi");
        assert!(out.contains("Bearer [REDACTED]"));
    }
}
