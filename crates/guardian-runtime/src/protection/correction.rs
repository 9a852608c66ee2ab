//! Deterministic textual fixes.
//!
//! | Fix | Removes |
//! |-----|---------|
//! | `strip_placeholder_comments` | comment-only lines that mark unfinished work |
//! | `strip_placeholder_statements` | lines holding only `pass`, `...`, `todo!()`, `unimplemented!()` or `raise NotImplementedError` |
//!
//! Each fix removes whole lines only, so applying a fix twice changes nothing
//! the second time.

use std::fmt;

use guardian_core::{Action, ActionKind};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref PLACEHOLDER_COMMENT: Regex = Regex::new(
        r"(?i)^\s*(//+|#+|/\*+|--|<!--)\s*(TODO|FIXME|XXX|HACK|\.\.\.\s*rest of (the )?(code|implementation)|rest of (the )?(code|implementation)|implement(ation)? (later|here)|placeholder|your code here)\b.*$"
    )
    .unwrap();

    static ref PLACEHOLDER_STATEMENT: Regex = Regex::new(
        r"^\s*(pass|\.\.\.;?|(todo|unimplemented)!\s*\(\s*\)\s*;?|raise\s+NotImplementedError(\(.*\))?)\s*$"
    )
    .unwrap();
}

/// One entry of the fix catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    StripPlaceholderComments,
    StripPlaceholderStatements,
}

impl FixKind {
    pub const CATALOG: [FixKind; 2] = [
        FixKind::StripPlaceholderComments,
        FixKind::StripPlaceholderStatements,
    ];

    fn matches(&self, line: &str) -> bool {
        match self {
            FixKind::StripPlaceholderComments => PLACEHOLDER_COMMENT.is_match(line),
            FixKind::StripPlaceholderStatements => PLACEHOLDER_STATEMENT.is_match(line),
        }
    }

    /// Apply the fix. Returns `None` when nothing would change.
    pub fn apply(&self, payload: &str) -> Option<String> {
        if !payload.lines().any(|line| self.matches(line)) {
            return None;
        }

        let mut fixed: String = payload
            .lines()
            .filter(|line| !self.matches(line))
            .collect::<Vec<_>>()
            .join("\n");
        if payload.ends_with('\n') && !fixed.is_empty() {
            fixed.push('\n');
        }
        Some(fixed)
    }
}

impl fmt::Display for FixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixKind::StripPlaceholderComments => f.write_str("strip_placeholder_comments"),
            FixKind::StripPlaceholderStatements => f.write_str("strip_placeholder_statements"),
        }
    }
}

/// A corrected payload and the fixes that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    pub payload: String,
    pub fixes: Vec<FixKind>,
}

/// Run the catalog over an action's payload.
///
/// Only create and edit actions carry content worth fixing. Returns `None`
/// when no fix applies.
pub fn propose(action: &Action) -> Option<Fix> {
    if !matches!(action.kind, ActionKind::Create | ActionKind::Edit) {
        return None;
    }

    let mut payload = action.payload.clone();
    let mut fixes = Vec::new();
    for kind in FixKind::CATALOG {
        if let Some(fixed) = kind.apply(&payload) {
            payload = fixed;
            fixes.push(kind);
        }
    }

    if fixes.is_empty() {
        None
    } else {
        Some(Fix { payload, fixes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_bare_placeholder_statement() {
        let action = Action::create(
            "/project/src/main.rs",
            "fn main() {\n    println!(\"hello\");\n    todo!();\n}",
        );
        let fix = propose(&action).unwrap();

        assert_eq!(fix.payload, "fn main() {\n    println!(\"hello\");\n}");
        assert_eq!(fix.fixes, vec![FixKind::StripPlaceholderStatements]);
    }

    #[test]
    fn test_strips_placeholder_comments() {
        let payload = "def load(path):\n    # TODO: handle missing files\n    return open(path).read()\n";
        let fix = propose(&Action::edit("/project/app.py", payload)).unwrap();

        assert_eq!(fix.payload, "def load(path):\n    return open(path).read()\n");
        assert_eq!(fix.fixes, vec![FixKind::StripPlaceholderComments]);
    }

    #[test]
    fn test_inline_markers_are_left_alone() {
        let payload = "let total = sum(values); // TODO: overflow\nlet label = \"pass\";\n";
        assert_eq!(propose(&Action::create("/p/a.rs", payload)), None);
    }

    #[test]
    fn test_fixes_are_idempotent() {
        let payload = "class Repo:\n    # FIXME\n    def get(self):\n        raise NotImplementedError()\n    def put(self):\n        ...\n";
        let once = propose(&Action::create("/p/repo.py", payload)).unwrap();
        let twice = propose(&Action::create("/p/repo.py", once.payload.clone()));

        assert_eq!(twice, None);
        assert_eq!(once.fixes.len(), 2);
    }

    #[test]
    fn test_delete_is_never_fixed() {
        assert_eq!(propose(&Action::delete("/project/.env")), None);
    }
}
