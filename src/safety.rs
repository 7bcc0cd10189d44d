//! Redaction for audit payloads and caller-facing text.
//!
//! Audit events pass through [`redact_fields`] at the sink boundary no matter
//! how they were built. Replies pass through [`LeakDetector::scrub`] with the
//! raw values the caller just supplied.

use regex::Regex;
use serde_json::{Map, Value};

/// Keys that must never reach a security event sink.
pub const REDACTED_KEYS: &[&str] = &["ssn", "ssn_last4", "dob"];

/// Placeholder written in place of scrubbed text.
pub const REDACTION_MARKER: &str = "[redacted]";

/// Whether a payload key is on the redaction list (case-insensitive).
pub fn is_redacted_key(key: &str) -> bool {
    REDACTED_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// Remove every redacted key from an object, descending into nested objects
/// and arrays. Returns the number of entries removed.
pub fn redact_fields(map: &mut Map<String, Value>) -> usize {
    let before = map.len();
    map.retain(|key, _| !is_redacted_key(key));
    let mut removed = before - map.len();

    for value in map.values_mut() {
        removed += redact_value(value);
    }
    removed
}

fn redact_value(value: &mut Value) -> usize {
    match value {
        Value::Object(inner) => redact_fields(inner),
        Value::Array(items) => items.iter_mut().map(redact_value).sum(),
        _ => 0,
    }
}

/// Shortest caller input worth scrubbing. Shorter values would collide with
/// attempt counts and hours in ordinary replies.
const MIN_WATCHED_LEN: usize = 4;

/// Scrubs caller-supplied secrets out of outbound text.
///
/// Only values carrying at least one digit are watched, and they match as
/// whole tokens, so ordinary words in a reply are never touched.
#[derive(Debug, Default)]
pub struct LeakDetector {
    patterns: Vec<Regex>,
}

impl LeakDetector {
    /// Create a detector with nothing to scrub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw value that must not appear in output. Values without a
    /// digit, or shorter than four characters once trimmed, are ignored.
    pub fn watch(mut self, secret: &str) -> Self {
        let trimmed = secret.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        if trimmed.chars().count() < MIN_WATCHED_LEN || !trimmed.chars().any(|c| c.is_ascii_digit())
        {
            return self;
        }
        match Regex::new(&format!(r"\b{}\b", regex::escape(trimmed))) {
            Ok(pattern) => self.patterns.push(pattern),
            Err(e) => tracing::warn!("Could not build leak pattern: {}", e),
        }
        self
    }

    /// Replace every watched token in `content` with [`REDACTION_MARKER`].
    pub fn scrub(&self, content: &str) -> String {
        let mut out = content.to_string();
        for pattern in &self.patterns {
            if pattern.is_match(&out) {
                tracing::warn!("Scrubbed caller-supplied secret from outbound text");
                out = pattern.replace_all(&out, REDACTION_MARKER).into_owned();
            }
        }
        out
    }
}
