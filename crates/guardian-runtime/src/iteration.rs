//! Iteration state and error fingerprinting.
//!
//! Two failures are the same failure when their normalized text matches.
//! Normalization strips the details that change from run to run without
//! changing the meaning of the error:
//!
//! | Detail | Replaced with |
//! |--------|---------------|
//! | ISO-8601 / clock timestamps | `<time>` |
//! | UUIDs | `<uuid>` |
//! | hex addresses (`0x7ffd…`) | `<addr>` |
//! | filesystem paths | `<path>` |
//! | `line N`, `:N:M` offsets | `<line>` |
//! | remaining numbers | `<n>` |

use std::fmt;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

lazy_static! {
    static ref NORMALIZERS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?").unwrap(), "<time>"),
        (Regex::new(r"\b\d{1,2}:\d{2}:\d{2}(\.\d+)?\b").unwrap(), "<time>"),
        (Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b").unwrap(), "<uuid>"),
        (Regex::new(r"(?i)\b0x[0-9a-f]+\b").unwrap(), "<addr>"),
        (Regex::new(r#"(?:[A-Za-z]:\\|~?/|\./|\.\./)[^\s:'",;)\]]*"#).unwrap(), "<path>"),
        (Regex::new(r"(?i)\bline\s+\d+(\s*,?\s*col(umn)?\s+\d+)?").unwrap(), "<line>"),
        (Regex::new(r":\d+(:\d+)?\b").unwrap(), "<line>"),
        (Regex::new(r"\d+").unwrap(), "<n>"),
        (Regex::new(r"\s+").unwrap(), " "),
    ];
}

/// Normalized text of an error, used to detect circular failures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorFingerprint(String);

impl ErrorFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint an error message.
pub fn normalize_error(message: &str) -> ErrorFingerprint {
    let mut text = message.trim().to_string();
    for (pattern, replacement) in NORMALIZERS.iter() {
        text = pattern.replace_all(&text, *replacement).into_owned();
    }
    ErrorFingerprint(text.trim().to_lowercase())
}

/// Attempts and failures of one action within one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationState {
    pub action_id: Uuid,
    pub attempt_count: u32,
    pub error_history: Vec<ErrorFingerprint>,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl IterationState {
    pub fn new(action_id: Uuid, started_at: DateTime<Utc>, deadline: DateTime<Utc>) -> Self {
        Self {
            action_id,
            attempt_count: 0,
            error_history: Vec::new(),
            started_at,
            deadline,
        }
    }

    /// Record one attempt, and its error if it failed.
    ///
    /// Returns the fingerprint of the error when it was already seen.
    pub fn record(&mut self, error: Option<&str>) -> Option<ErrorFingerprint> {
        self.attempt_count += 1;
        let fingerprint = normalize_error(error?);
        let repeated = self.error_history.contains(&fingerprint);
        self.error_history.push(fingerprint.clone());
        repeated.then_some(fingerprint)
    }

    /// The first fingerprint recorded at least twice.
    pub fn repeated_fingerprint(&self) -> Option<&ErrorFingerprint> {
        self.error_history
            .iter()
            .enumerate()
            .find(|(idx, fp)| self.error_history[..*idx].contains(fp))
            .map(|(_, fp)| fp)
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}
