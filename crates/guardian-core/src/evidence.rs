//! Evidence linking for violations.
//!
//! A violation may point at the location that triggered it: a byte range
//! or line of the payload, a context field, or a metadata key.

use serde::{Deserialize, Serialize};

/// Where a piece of evidence comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Payload,
    Context,
    Metadata,
    Target,
}

/// A piece of evidence supporting a violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    /// What this evidence supports
    pub claim: String,

    /// Where the evidence comes from
    pub source: EvidenceSource,

    /// Pointer to the location (e.g., "payload:line 12")
    pub pointer: String,

    /// The offending text, trimmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Longest snippet kept on a piece of evidence.
const MAX_SNIPPET_CHARS: usize = 120;

impl Evidence {
    /// Evidence from a byte range of the payload.
    pub fn from_payload(claim: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            claim: claim.into(),
            source: EvidenceSource::Payload,
            pointer: format!("payload[{}:{}]", start, end),
            snippet: None,
        }
    }

    /// Evidence from a 1-based line of the payload.
    pub fn at_line(claim: impl Into<String>, line: usize, text: &str) -> Self {
        Self {
            claim: claim.into(),
            source: EvidenceSource::Payload,
            pointer: format!("payload:line {}", line),
            snippet: Some(truncate(text.trim())),
        }
    }

    /// Evidence from a field of the action context.
    pub fn from_context(claim: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            source: EvidenceSource::Context,
            pointer: format!("context.{}", field.into()),
            snippet: None,
        }
    }

    /// Evidence from action metadata.
    pub fn from_metadata(claim: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            source: EvidenceSource::Metadata,
            pointer: format!("metadata.{}", key.into()),
            snippet: None,
        }
    }

    /// Evidence from the action target itself.
    pub fn from_target(claim: impl Into<String>, target: &str) -> Self {
        Self {
            claim: claim.into(),
            source: EvidenceSource::Target,
            pointer: "target".to_string(),
            snippet: Some(truncate(target)),
        }
    }
}

impl Evidence {
    /// Point into member `index` of a batch.
    pub fn scope_to_member(&mut self, index: usize) {
        self.pointer = format!("member[{}]:{}", index, self.pointer);
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_SNIPPET_CHARS {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(MAX_SNIPPET_CHARS).collect();
        cut.push('…');
        cut
    }
}
