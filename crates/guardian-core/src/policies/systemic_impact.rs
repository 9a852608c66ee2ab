//! Systemic-impact validator.
//!
//! **Question**: Does the change break existing callers?
//!
//! Function signatures in the payload are compared with the signatures last
//! accepted for the same target (`ActionContext::prior_signatures`), after
//! whitespace normalization.
//!
//! | Change | Severity |
//! |--------|----------|
//! | public signature changed or removed | HIGH |
//! | private signature changed | LOW |
//! | delete of a target that exposes public signatures | HIGH |

use lazy_static::lazy_static;
use regex::Regex;

use crate::evidence::Evidence;
use crate::types::{Action, ActionContext, ActionKind, PolicyId, Severity, Violation};

use super::patterns::{is_unified_diff, review_lines};
use super::PolicyValidator;

lazy_static! {
    static ref RUST_FN: Regex = Regex::new(
        r#"^\s*(pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+([A-Za-z_]\w*)\s*(?:<[^>]*>)?\s*\([^)]*\)\s*(?:->\s*[^{;]+)?"#
    ).unwrap();

    static ref PY_DEF: Regex = Regex::new(
        r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\([^)]*\)\s*(?:->\s*[^:]+)?:"
    ).unwrap();

    static ref JS_FUNCTION: Regex = Regex::new(
        r"^\s*(export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*\([^)]*\)"
    ).unwrap();
}

/// A function signature found in a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    /// Whitespace-normalized signature text
    pub text: String,
    pub public: bool,
    pub line: usize,
}

fn normalize(signature: &str) -> String {
    signature
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(|c: char| c == '{' || c == ':' || c.is_whitespace())
        .to_string()
}

fn parse_signature(text: &str, line: usize) -> Option<Signature> {
    if let Some(caps) = RUST_FN.captures(text) {
        return Some(Signature {
            name: caps[2].to_string(),
            text: normalize(&caps[0]),
            public: caps.get(1).is_some(),
            line,
        });
    }
    if let Some(caps) = PY_DEF.captures(text) {
        return Some(Signature {
            name: caps[1].to_string(),
            text: normalize(&caps[0]),
            public: !caps[1].starts_with('_'),
            line,
        });
    }
    if let Some(caps) = JS_FUNCTION.captures(text) {
        return Some(Signature {
            name: caps[2].to_string(),
            text: normalize(&caps[0]),
            public: caps.get(1).is_some(),
            line,
        });
    }
    None
}

/// Extract function signatures from the reviewed lines of a payload.
pub fn extract_signatures(payload: &str) -> Vec<Signature> {
    review_lines(payload)
        .into_iter()
        .filter_map(|l| parse_signature(l.text, l.number))
        .collect()
}

/// The systemic-impact validator.
pub struct SystemicImpactValidator;

impl SystemicImpactValidator {
    pub fn new() -> Self {
        Self
    }

    /// Whether a previously accepted signature was public.
    fn prior_is_public(prior: &str, current: Option<&Signature>) -> bool {
        match parse_signature(prior, 0) {
            Some(sig) => sig.public,
            None => current.map(|s| s.public).unwrap_or(true),
        }
    }
}

impl Default for SystemicImpactValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyValidator for SystemicImpactValidator {
    fn policy_id(&self) -> PolicyId {
        PolicyId::SystemicImpact
    }

    fn evaluate(&self, action: &Action, context: &ActionContext) -> Vec<Violation> {
        if context.prior_signatures.is_empty() {
            return Vec::new();
        }

        match action.kind {
            ActionKind::Delete => {
                let public: Vec<&str> = context
                    .prior_signatures
                    .iter()
                    .filter(|(_, sig)| Self::prior_is_public(sig, None))
                    .map(|(name, _)| name.as_str())
                    .collect();
                if public.is_empty() {
                    return Vec::new();
                }
                vec![Violation::new(
                    PolicyId::SystemicImpact,
                    Severity::High,
                    format!("Delete removes public API: {}", public.join(", ")),
                )
                .with_evidence(Evidence::from_context(
                    "target exposes public signatures",
                    "prior_signatures",
                ))]
            }
            ActionKind::Create | ActionKind::Edit => {
                let current = extract_signatures(&action.payload);
                let partial = is_unified_diff(&action.payload);
                let mut violations = Vec::new();

                for (name, prior) in &context.prior_signatures {
                    let found = current.iter().find(|s| &s.name == name);
                    let public = Self::prior_is_public(prior, found);

                    match found {
                        Some(sig) if sig.text != normalize(prior) => {
                            let severity = if public || sig.public {
                                Severity::High
                            } else {
                                Severity::Low
                            };
                            violations.push(
                                Violation::new(
                                    PolicyId::SystemicImpact,
                                    severity,
                                    format!(
                                        "Signature of '{}' changed from `{}` to `{}`",
                                        name,
                                        normalize(prior),
                                        sig.text
                                    ),
                                )
                                .with_evidence(Evidence::at_line(
                                    "signature differs from accepted version",
                                    sig.line,
                                    &sig.text,
                                )),
                            );
                        }
                        Some(_) => {}
                        // A diff only shows part of the file
                        None if partial => {}
                        None if public => violations.push(
                            Violation::new(
                                PolicyId::SystemicImpact,
                                Severity::High,
                                format!("Public function '{}' was removed", name),
                            )
                            .with_evidence(Evidence::from_context(
                                "previously accepted signature",
                                format!("prior_signatures.{}", name),
                            )),
                        ),
                        None => {}
                    }
                }

                violations
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ActionContext {
        ActionContext::new()
            .with_prior_signature("load", "pub fn load(path: &Path) -> Result<Config>")
            .with_prior_signature("helper", "fn helper(x: u32) -> u32")
    }

    #[test]
    fn test_extract_signatures() {
        let payload = "pub fn load(path:  &Path) -> Result<Config> {\ndef _private(x):\nexport async function fetchAll(url) {\n";
        let sigs = extract_signatures(payload);

        assert_eq!(sigs.len(), 3);
        assert_eq!(sigs[0].text, "pub fn load(path: &Path) -> Result<Config>");
        assert!(sigs[0].public);
        assert!(!sigs[1].public);
        assert_eq!(sigs[2].name, "fetchAll");
        assert!(sigs[2].public);
    }

    #[test]
    fn test_unchanged_signatures_pass() {
        let payload = "pub fn load(path: &Path) -> Result<Config> {\n    todo()\n}\nfn helper(x: u32) -> u32 { x }\n";
        let violations = SystemicImpactValidator::new()
            .evaluate(&Action::edit("/p/config.rs", payload), &context());
        assert!(violations.is_empty());
    }

    #[test]
    fn test_public_change_is_high() {
        let payload = "pub fn load(path: &Path, strict: bool) -> Result<Config> {\n}\nfn helper(x: u32) -> u32 { x }\n";
        let violations = SystemicImpactValidator::new()
            .evaluate(&Action::edit("/p/config.rs", payload), &context());

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::High);
    }

    #[test]
    fn test_private_change_is_low() {
        let payload = "pub fn load(path: &Path) -> Result<Config> {\n}\nfn helper(x: u64) -> u64 { x }\n";
        let violations = SystemicImpactValidator::new()
            .evaluate(&Action::edit("/p/config.rs", payload), &context());

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Low);
    }

    #[test]
    fn test_removed_public_function_is_high() {
        let violations = SystemicImpactValidator::new()
            .evaluate(&Action::edit("/p/config.rs", "fn helper(x: u32) -> u32 { x }\n"), &context());
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("removed"));
    }

    #[test]
    fn test_delete_with_public_api_is_high() {
        let violations =
            SystemicImpactValidator::new().evaluate(&Action::delete("/p/config.rs"), &context());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::High);
        assert!(violations[0].message.contains("load"));
        assert!(!violations[0].message.contains("helper"));
    }

    #[test]
    fn test_no_prior_signatures_passes() {
        let violations = SystemicImpactValidator::new()
            .evaluate(&Action::delete("/p/config.rs"), &ActionContext::new());
        assert!(violations.is_empty());
    }
}
