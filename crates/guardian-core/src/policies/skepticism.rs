//! Skepticism validator.
//!
//! **Question**: Does the content repeat a known misconception?
//!
//! The payload is checked line by line against a catalog of misconceptions:
//! insecure primitives that are often presented as safe, and algorithmic
//! claims that cannot hold. Each entry carries its own severity. Entries
//! from `skepticism.extra` are appended after the built-in catalog.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::SkepticismConfig;
use crate::evidence::Evidence;
use crate::types::{Action, ActionContext, ActionKind, PolicyId, Severity, Violation};
use crate::EngineError;

use super::patterns::review_lines;
use super::PolicyValidator;

/// A catalog entry.
#[derive(Debug, Clone)]
pub struct Misconception {
    pub id: String,
    pub pattern: Regex,
    pub severity: Severity,
    pub message: String,
}

impl Misconception {
    fn builtin(id: &str, pattern: &str, severity: Severity, message: &str) -> Self {
        Self {
            id: id.to_string(),
            pattern: Regex::new(pattern).unwrap(),
            severity,
            message: message.to_string(),
        }
    }
}

lazy_static! {
    static ref BUILTIN_CATALOG: Vec<Misconception> = vec![
        Misconception::builtin(
            "weak_password_hash",
            r"(?i)\b(md5|sha1)\b.*\bpassword|\bpassword\b.*\b(md5|sha1)\b",
            Severity::High,
            "MD5/SHA-1 are not password hashes; use a slow KDF such as argon2, scrypt or bcrypt",
        ),
        Misconception::builtin(
            "eval_untrusted",
            r"(^|[^\w.])eval\s*\(",
            Severity::High,
            "eval() executes arbitrary code; parse the input instead",
        ),
        Misconception::builtin(
            "insecure_deserialization",
            r"\b(pickle|cPickle|marshal)\.loads?\s*\(|\byaml\.load\s*\([^)]*\)\s*$|\bObjectInputStream\b",
            Severity::High,
            "Deserializing untrusted data with this API can execute code",
        ),
        Misconception::builtin(
            "tls_verification_disabled",
            r"(?i)verify\s*=\s*False|rejectUnauthorized\s*:\s*false|danger_accept_invalid_certs\s*\(\s*true|InsecureSkipVerify\s*:\s*true|CERT_NONE",
            Severity::High,
            "Disabling certificate verification does not make a connection secure",
        ),
        Misconception::builtin(
            "broken_cipher",
            r"(?i:\bAES[-_/]?\d*[-_/]?ECB\b)|\bMODE_ECB\b|\b(3?DES|RC4)\b",
            Severity::High,
            "ECB mode, DES and RC4 do not provide confidentiality",
        ),
        Misconception::builtin(
            "unbounded_gets",
            r"\bgets\s*\(",
            Severity::Critical,
            "gets() cannot be used safely; it was removed from the C standard",
        ),
        Misconception::builtin(
            "unbounded_copy",
            r"\b(strcpy|strcat|sprintf)\s*\(",
            Severity::Medium,
            "Unbounded string copy; use a length-checked variant",
        ),
        Misconception::builtin(
            "weak_random_secret",
            r"(?i)(token|secret|password|nonce|salt|api_?key).*\b(Math\.random\s*\(|random\.(random|randint|choice)\s*\(|rand\s*\(\s*\))",
            Severity::High,
            "Non-cryptographic randomness must not generate secrets",
        ),
        Misconception::builtin(
            "impossible_sort_complexity",
            r"(?i)sort(s|ed|ing)?\b.*\bO\(\s*(1|n|log\s*n)\s*\)",
            Severity::Medium,
            "Comparison sorting cannot beat O(n log n)",
        ),
        Misconception::builtin(
            "unsorted_binary_search",
            r"(?i)binary\s+search.*\bunsorted\b|\bunsorted\b.*binary\s+search",
            Severity::Medium,
            "Binary search requires sorted input",
        ),
        Misconception::builtin(
            "sql_string_concatenation",
            r#"(?i)\b(select|insert|update|delete)\b.*(["']\s*\+\s*\w|\bformat!\(|\bf["']|%s["']\s*%)"#,
            Severity::High,
            "Building SQL by string concatenation invites injection; use bound parameters",
        ),
    ];
}

/// The skepticism validator.
pub struct SkepticismValidator {
    catalog: Vec<Misconception>,
}

impl SkepticismValidator {
    /// Build the validator from the built-in catalog plus configured entries.
    pub fn new(config: &SkepticismConfig) -> Result<Self, EngineError> {
        let mut catalog = BUILTIN_CATALOG.clone();
        for spec in &config.extra {
            let pattern = Regex::new(&spec.pattern).map_err(|e| EngineError::InvalidPattern {
                pattern: spec.pattern.clone(),
                reason: e.to_string(),
            })?;
            catalog.push(Misconception {
                id: spec.id.clone(),
                pattern,
                severity: spec.severity,
                message: spec.message.clone(),
            });
        }
        Ok(Self { catalog })
    }

    /// Ids of the catalog entries, in evaluation order.
    pub fn catalog_ids(&self) -> Vec<&str> {
        self.catalog.iter().map(|m| m.id.as_str()).collect()
    }
}

impl PolicyValidator for SkepticismValidator {
    fn policy_id(&self) -> PolicyId {
        PolicyId::Skepticism
    }

    fn evaluate(&self, action: &Action, _context: &ActionContext) -> Vec<Violation> {
        if action.kind == ActionKind::Delete {
            return Vec::new();
        }

        let mut violations = Vec::new();
        for line in review_lines(&action.payload) {
            for entry in &self.catalog {
                if entry.pattern.is_match(line.text) {
                    violations.push(
                        Violation::new(
                            PolicyId::Skepticism,
                            entry.severity,
                            format!("{}: {}", entry.id, entry.message),
                        )
                        .with_evidence(Evidence::at_line(entry.id.as_str(), line.number, line.text)),
                    );
                }
            }
        }
        violations
    }
}
