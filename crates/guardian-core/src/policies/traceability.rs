//! Traceability validator.
//!
//! **Question**: Are non-trivial design decisions documented?
//!
//! Structural heuristics spot architectural introductions. When the payload
//! introduces one and neither the context nor the payload carries a
//! rationale note, each distinct introduction is reported once as MEDIUM.

use lazy_static::lazy_static;
use regex::Regex;

use crate::evidence::Evidence;
use crate::types::{Action, ActionContext, ActionKind, PolicyId, Severity, Violation};

use super::patterns::review_lines;
use super::PolicyValidator;

lazy_static! {
    static ref ARCHITECTURAL_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("new abstraction", Regex::new(r"^\s*(pub(\([^)]*\))?\s+)?trait\s+\w+|\binterface\s+\w+\s*(\{|extends\b|<)|\babstract\s+class\b|\(\s*(ABC|Protocol)\s*\)").unwrap()),
        ("design pattern type", Regex::new(r"\b(struct|class|enum|type|interface|trait)\s+\w*(Factory|Singleton|Strategy|Observer|Registry|Visitor|Mediator)\b").unwrap()),
        ("global mutable state", Regex::new(r"\bstatic\s+mut\b|^\s*global\s+\w+").unwrap()),
        ("unsafe code", Regex::new(r"\bunsafe\s*(\{|fn\b|impl\b)").unwrap()),
        ("spawned concurrency", Regex::new(r"\b(std::)?thread::spawn\b|\btokio::spawn\b|\bthreading\.Thread\(|\bmultiprocessing\.Process\(|\bnew\s+Worker\(|\bgo\s+func\b").unwrap()),
    ];

    /// In-payload rationale note
    static ref RATIONALE_MARKER: Regex = Regex::new(r"(?i)\b(rationale|why|design)\s*:|\bADR-\d+").unwrap();
}

/// The traceability validator.
pub struct TraceabilityValidator;

impl TraceabilityValidator {
    pub fn new() -> Self {
        Self
    }

    fn has_rationale(action: &Action, context: &ActionContext) -> bool {
        let noted = context
            .rationale
            .as_deref()
            .map(|r| !r.trim().is_empty())
            .unwrap_or(false);
        noted || RATIONALE_MARKER.is_match(&action.payload)
    }
}

impl Default for TraceabilityValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyValidator for TraceabilityValidator {
    fn policy_id(&self) -> PolicyId {
        PolicyId::Traceability
    }

    fn evaluate(&self, action: &Action, context: &ActionContext) -> Vec<Violation> {
        if !matches!(action.kind, ActionKind::Create | ActionKind::Edit) {
            return Vec::new();
        }
        if Self::has_rationale(action, context) {
            return Vec::new();
        }

        let lines = review_lines(&action.payload);
        ARCHITECTURAL_PATTERNS
            .iter()
            .filter_map(|(name, re)| {
                let first = lines.iter().find(|l| re.is_match(l.text))?;
                Some(
                    Violation::new(
                        PolicyId::Traceability,
                        Severity::Medium,
                        format!("Undocumented design decision: {}", name),
                    )
                    .with_evidence(Evidence::at_line(*name, first.number, first.text)),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluate(payload: &str, context: &ActionContext) -> Vec<Violation> {
        TraceabilityValidator::new().evaluate(&Action::create("/p/lib.rs", payload), context)
    }

    #[test]
    fn test_plain_code_passes() {
        let violations = evaluate("fn add(a: u32, b: u32) -> u32 {\n    a + b\n}\n", &ActionContext::new());
        assert!(violations.is_empty());
    }

    #[test]
    fn test_new_trait_without_rationale() {
        let violations = evaluate(
            "pub trait Storage {\n    fn get(&self) -> u8;\n}\n",
            &ActionContext::new(),
        );
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Medium);
        assert!(violations[0].message.ends_with("new abstraction"));
    }

    #[test]
    fn test_each_distinct_pattern_reported_once() {
        let payload = "static mut COUNTER: u32 = 0;\nstatic mut OTHER: u32 = 0;\nunsafe { COUNTER += 1; }\nstruct HandlerRegistry;\n";
        let violations = evaluate(payload, &ActionContext::new());
        let names: Vec<_> = violations.iter().map(|v| v.message.clone()).collect();
        assert_eq!(
            names,
            vec![
                "Undocumented design decision: design pattern type",
                "Undocumented design decision: global mutable state",
                "Undocumented design decision: unsafe code",
            ]
        );
    }

    #[test]
    fn test_context_rationale_suppresses() {
        let context = ActionContext::new().with_rationale("Pluggable storage for tests");
        let violations = evaluate("pub trait Storage {}\n", &context);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_inline_rationale_suppresses() {
        let payload = "// Rationale: handlers register at startup\nstruct HandlerRegistry;\n";
        assert!(evaluate(payload, &ActionContext::new()).is_empty());
    }

    #[test]
    fn test_spawned_thread() {
        let violations = evaluate("std::thread::spawn(move || work());\n", &ActionContext::new());
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.ends_with("spawned concurrency"));
    }
}
