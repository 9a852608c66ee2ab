//! Completeness validator.
//!
//! **Question**: Is the proposed content complete, without placeholders?
//!
//! | Finding | Severity |
//! |---------|----------|
//! | lazy marker (fewer than 3 in the payload) | MEDIUM |
//! | lazy marker (3 or more in the payload) | HIGH |
//! | unbalanced delimiters in source code | HIGH |
//! | lazy density above the configured threshold | CRITICAL |
//!
//! Density is the number of lines carrying a lazy marker per 100 non-empty
//! reviewed lines.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::CompletenessConfig;
use crate::evidence::Evidence;
use crate::types::{Action, ActionContext, ActionKind, PolicyId, Severity, Violation};

use super::patterns::{
    is_comment, is_unified_diff, review_lines, strip_line_comment, strip_literals, QuoteStyle,
};
use super::PolicyValidator;

lazy_static! {
    static ref LAZY_MARKERS: Vec<(&'static str, Regex)> = vec![
        ("todo comment", Regex::new(r"(//|#|/\*|--|<!--)\s*(TODO|FIXME|XXX|HACK)\b").unwrap()),
        ("placeholder macro", Regex::new(r"\b(todo|unimplemented)!\s*\(").unwrap()),
        ("not implemented error", Regex::new(r"\braise\s+NotImplementedError\b").unwrap()),
        ("not implemented throw", Regex::new(r#"(?i)\bthrow\s+new\s+Error\(\s*["'](not implemented|todo)"#).unwrap()),
        ("bare pass", Regex::new(r"^\s*pass\s*$").unwrap()),
        ("bare ellipsis", Regex::new(r"^\s*\.\.\.\s*;?\s*$").unwrap()),
        ("elided code comment", Regex::new(r"(?i)(//|#|/\*)\s*(\.\.\.\s*)?(rest of (the )?(code|implementation)|implement(ation)? (later|here)|placeholder|your code here|existing code|remaining (code|logic|implementation))").unwrap()),
    ];
}

/// Extensions of files whose delimiters must balance.
const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "c", "h", "cc", "cpp", "hpp", "cs",
    "swift", "rb", "php", "scala", "json",
];

/// Markers at or above this count raise each marker to HIGH.
const HIGH_MARKER_COUNT: usize = 3;

/// A line that carries a lazy marker.
#[derive(Debug, Clone, PartialEq)]
struct Marker {
    name: &'static str,
    line: usize,
    text: String,
}

fn find_markers(payload: &str) -> (Vec<Marker>, usize) {
    let mut markers = Vec::new();
    let mut non_empty = 0;

    for line in review_lines(payload) {
        if line.text.trim().is_empty() {
            continue;
        }
        non_empty += 1;
        // At most one marker per line
        if let Some((name, _)) = LAZY_MARKERS.iter().find(|(_, re)| re.is_match(line.text)) {
            markers.push(Marker {
                name: *name,
                line: line.number,
                text: line.text.to_string(),
            });
        }
    }

    (markers, non_empty)
}

/// Lazy markers per 100 non-empty reviewed lines.
pub fn lazy_density(payload: &str) -> f64 {
    let (markers, non_empty) = find_markers(payload);
    if non_empty == 0 {
        return 0.0;
    }
    markers.len() as f64 * 100.0 / non_empty as f64
}

/// First line at which delimiters stop balancing, if any.
fn unbalanced_delimiter(payload: &str, style: QuoteStyle) -> Option<(usize, String)> {
    let mut stack: Vec<(char, usize, String)> = Vec::new();

    for line in review_lines(payload) {
        if is_comment(line.text) {
            continue;
        }
        let code = strip_literals(strip_line_comment(line.text), style);
        for c in code.chars() {
            match c {
                '(' | '[' | '{' => stack.push((c, line.number, line.text.to_string())),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _, _)) if open == expected => {}
                        _ => return Some((line.number, line.text.to_string())),
                    }
                }
                _ => {}
            }
        }
    }

    stack.pop().map(|(_, number, text)| (number, text))
}

fn is_source_target(target: &str) -> bool {
    let name = target.rsplit(['/', '\\']).next().unwrap_or(target);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            SOURCE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
        }
        _ => false,
    }
}

/// The completeness validator.
pub struct CompletenessValidator {
    density_threshold: f64,
}

impl CompletenessValidator {
    pub fn new(config: &CompletenessConfig) -> Self {
        Self {
            density_threshold: config.density_threshold,
        }
    }
}

impl Default for CompletenessValidator {
    fn default() -> Self {
        Self::new(&CompletenessConfig::default())
    }
}

impl PolicyValidator for CompletenessValidator {
    fn policy_id(&self) -> PolicyId {
        PolicyId::Completeness
    }

    fn evaluate(&self, action: &Action, _context: &ActionContext) -> Vec<Violation> {
        if !matches!(action.kind, ActionKind::Create | ActionKind::Edit) {
            return Vec::new();
        }

        let payload = &action.payload;
        let (markers, non_empty) = find_markers(payload);
        let mut violations = Vec::new();

        let severity = if markers.len() >= HIGH_MARKER_COUNT {
            Severity::High
        } else {
            Severity::Medium
        };
        for marker in &markers {
            violations.push(
                Violation::new(
                    PolicyId::Completeness,
                    severity,
                    format!("Lazy marker ({}) at line {}", marker.name, marker.line),
                )
                .with_evidence(Evidence::at_line(marker.name, marker.line, &marker.text)),
            );
        }

        // Hunks of a diff need not balance on their own
        if !is_unified_diff(payload) && is_source_target(&action.target) {
            let style = QuoteStyle::for_target(&action.target);
            if let Some((line, text)) = unbalanced_delimiter(payload, style) {
                violations.push(
                    Violation::new(
                        PolicyId::Completeness,
                        Severity::High,
                        format!("Unbalanced delimiters near line {}", line),
                    )
                    .with_evidence(Evidence::at_line("structurally incomplete", line, &text)),
                );
            }
        }

        if non_empty > 0 {
            let density = markers.len() as f64 * 100.0 / non_empty as f64;
            if density > self.density_threshold {
                violations.push(Violation::new(
                    PolicyId::Completeness,
                    Severity::Critical,
                    format!(
                        "Lazy density {:.1} per 100 lines exceeds threshold {:.1}",
                        density, self.density_threshold
                    ),
                ));
            }
        }

        tracing::debug!(
            path = %action.target,
            markers = markers.len(),
            violations = violations.len(),
            "completeness evaluated"
        );

        violations
    }
}
