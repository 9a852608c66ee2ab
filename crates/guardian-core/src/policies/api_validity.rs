//! API-validity validator.
//!
//! **Question**: Does every referenced API actually exist?
//!
//! Two checks, both HIGH:
//! - a reference to a deny-listed API name (names generated before that do
//!   not exist), matched on word boundaries anywhere in the reviewed payload
//! - an import whose root module is not in the known symbol set, when that
//!   set is non-empty (configured symbols plus `ActionContext::known_symbols`)

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::ApiConfig;
use crate::evidence::Evidence;
use crate::types::{Action, ActionContext, ActionKind, PolicyId, Severity, Violation};
use crate::EngineError;

use super::patterns::{review_lines, ReviewLine};
use super::PolicyValidator;

lazy_static! {
    static ref RUST_USE: Regex = Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+(?:::)?([A-Za-z_]\w*)").unwrap();
    static ref RUST_EXTERN: Regex = Regex::new(r"^\s*extern\s+crate\s+([A-Za-z_]\w*)").unwrap();
    static ref PY_IMPORT: Regex = Regex::new(r"^\s*import\s+([\w.]+(?:\s*,\s*[\w.]+)*)").unwrap();
    static ref PY_FROM: Regex = Regex::new(r"^\s*from\s+(\.*[\w.]*)\s+import\b").unwrap();
    static ref JS_IMPORT: Regex = Regex::new(r#"^\s*import\s+(?:[^'"]*\s+from\s+)?['"]([^'"]+)['"]"#).unwrap();
    static ref JS_REQUIRE: Regex = Regex::new(r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap();
}

/// Module roots that always resolve.
const BUILTIN_ROOTS: &[&str] = &["crate", "self", "super", "std", "core", "alloc"];

/// An import statement found in a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub module: String,
    pub line: usize,
    pub text: String,
}

impl ImportRef {
    /// The root module, or `None` for relative imports.
    pub fn root(&self) -> Option<&str> {
        let module = self.module.as_str();
        if module.starts_with('.') {
            return None;
        }
        if module.starts_with("node:") {
            return Some("node:");
        }
        if module.starts_with('@') {
            // Scoped package: @scope/name
            let mut parts = module.splitn(3, '/');
            let scope = parts.next()?;
            return match parts.next() {
                Some(name) => Some(&module[..scope.len() + 1 + name.len()]),
                None => Some(scope),
            };
        }
        module.split(['.', '/', ':']).next()
    }
}

/// Extract imports from the reviewed lines of a payload.
pub fn extract_imports(payload: &str) -> Vec<ImportRef> {
    let mut imports = Vec::new();

    for ReviewLine { number, text } in review_lines(payload) {
        let mut push = |module: &str| {
            imports.push(ImportRef {
                module: module.trim().to_string(),
                line: number,
                text: text.to_string(),
            })
        };

        if let Some(caps) = RUST_USE.captures(text).or_else(|| RUST_EXTERN.captures(text)) {
            push(&caps[1]);
        } else if let Some(caps) = PY_FROM.captures(text) {
            push(&caps[1]);
        } else if let Some(caps) = JS_IMPORT.captures(text) {
            push(&caps[1]);
        } else if let Some(caps) = PY_IMPORT.captures(text) {
            for module in caps[1].split(',') {
                push(module);
            }
        } else {
            for caps in JS_REQUIRE.captures_iter(text) {
                push(&caps[1]);
            }
        }
    }

    imports
}

fn symbol_root(symbol: &str) -> &str {
    symbol.split(['.', '/', ':']).next().unwrap_or(symbol)
}

/// The API-validity validator.
pub struct ApiValidityValidator {
    deny_list: Vec<(String, Regex)>,
    known_symbols: BTreeSet<String>,
}

impl ApiValidityValidator {
    /// Build the validator, compiling one word-bounded matcher per deny-list entry.
    pub fn new(config: &ApiConfig) -> Result<Self, EngineError> {
        let deny_list = config
            .deny_list
            .iter()
            .map(|name| {
                let pattern = format!(r"(?:^|[^\w.:]){}(?:[^\w]|$)", regex::escape(name));
                Regex::new(&pattern)
                    .map(|re| (name.clone(), re))
                    .map_err(|e| EngineError::InvalidPattern {
                        pattern: name.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            deny_list,
            known_symbols: config.known_symbols.iter().cloned().collect(),
        })
    }

    fn known_roots<'a>(&'a self, context: &'a ActionContext) -> BTreeSet<&'a str> {
        self.known_symbols
            .iter()
            .chain(context.known_symbols.iter())
            .map(|s| symbol_root(s))
            .collect()
    }
}

impl PolicyValidator for ApiValidityValidator {
    fn policy_id(&self) -> PolicyId {
        PolicyId::ApiValidity
    }

    fn evaluate(&self, action: &Action, context: &ActionContext) -> Vec<Violation> {
        if !matches!(action.kind, ActionKind::Create | ActionKind::Edit) {
            return Vec::new();
        }

        let mut violations = Vec::new();

        for line in review_lines(&action.payload) {
            for (name, re) in &self.deny_list {
                if re.is_match(line.text) {
                    violations.push(
                        Violation::new(
                            PolicyId::ApiValidity,
                            Severity::High,
                            format!("Reference to non-existent API '{}'", name),
                        )
                        .with_evidence(Evidence::at_line(
                            format!("'{}' is a known hallucinated API", name),
                            line.number,
                            line.text,
                        )),
                    );
                }
            }
        }

        let known = self.known_roots(context);
        if !known.is_empty() {
            for import in extract_imports(&action.payload) {
                let Some(root) = import.root() else {
                    continue;
                };
                if BUILTIN_ROOTS.contains(&root) || known.contains(root) {
                    continue;
                }
                violations.push(
                    Violation::new(
                        PolicyId::ApiValidity,
                        Severity::High,
                        format!("Import of unresolvable module '{}'", import.module),
                    )
                    .with_evidence(Evidence::at_line(
                        format!("'{}' is not a known module", root),
                        import.line,
                        &import.text,
                    )),
                );
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(known: &[&str]) -> ApiValidityValidator {
        let config = ApiConfig {
            known_symbols: known.iter().map(|s| s.to_string()).collect(),
            ..ApiConfig::default()
        };
        ApiValidityValidator::new(&config).unwrap()
    }

    fn evaluate(v: &ApiValidityValidator, payload: &str) -> Vec<Violation> {
        v.evaluate(&Action::create("/p/f", payload), &ActionContext::new())
    }

    #[test]
    fn test_deny_listed_api_is_high() {
        let violations = evaluate(&validator(&[]), "data = requests.get_json(url)\n");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::High);
        assert!(violations[0].message.contains("requests.get_json"));
    }

    #[test]
    fn test_deny_list_is_word_bounded() {
        let violations = evaluate(&validator(&[]), "x = myrequests.get_json_v2(url)\n");
        assert!(violations.is_empty());
    }

    #[test]
    fn test_no_known_symbols_skips_resolution() {
        let violations = evaluate(&validator(&[]), "import totally_made_up\n");
        assert!(violations.is_empty());
    }

    #[test]
    fn test_unknown_rust_crate_flagged() {
        let v = validator(&["serde", "tokio::sync"]);
        let payload = "use serde::Deserialize;\nuse tokio::sync::Mutex;\nuse fancy_async::Runner;\nuse std::fs;\nuse crate::types::Action;\n";
        let violations = evaluate(&v, payload);

        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("fancy_async"));
        assert_eq!(violations[0].evidence.as_ref().unwrap().pointer, "payload:line 3");
    }

    #[test]
    fn test_python_and_js_imports() {
        let v = validator(&["os", "react"]);
        let payload = "import os, numpy\nfrom os.path import join\nfrom . import sibling\nimport React from 'react'\nconst x = require('./local')\nconst y = require('leftpad')\n";
        let violations = evaluate(&v, payload);

        let modules: Vec<_> = violations.iter().map(|v| v.message.clone()).collect();
        assert_eq!(violations.len(), 2, "{:?}", modules);
        assert!(modules[0].contains("numpy"));
        assert!(modules[1].contains("leftpad"));
    }

    #[test]
    fn test_context_symbols_extend_known_set() {
        let v = validator(&["serde"]);
        let mut context = ActionContext::new();
        context.known_symbols.insert("anyhow".to_string());
        let violations = v.evaluate(
            &Action::create("/p/main.rs", "use anyhow::Result;\n"),
            &context,
        );
        assert!(violations.is_empty());
    }

    #[test]
    fn test_scoped_package_root() {
        let import = ImportRef {
            module: "@scope/pkg/sub".to_string(),
            line: 1,
            text: String::new(),
        };
        assert_eq!(import.root(), Some("@scope/pkg"));
    }
}
