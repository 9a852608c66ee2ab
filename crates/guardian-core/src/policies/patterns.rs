//! Shared text helpers for validators.
//!
//! Payloads are either full file contents or unified diffs. For a diff only
//! the added lines are reviewed: removed and context lines already exist and
//! are not part of the proposal.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref HUNK_HEADER: Regex = Regex::new(r"^@@ -\d+(,\d+)? \+\d+(,\d+)? @@").unwrap();

    /// Comment introducers for the languages validators look at
    static ref COMMENT_PREFIX: Regex = Regex::new(r"^\s*(//|#|/\*|\*|--|;)").unwrap();
}

/// A reviewed line: 1-based position in the payload and its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewLine<'a> {
    pub number: usize,
    pub text: &'a str,
}

/// Whether the payload is a unified diff.
pub fn is_unified_diff(payload: &str) -> bool {
    let mut has_header = false;
    let mut has_hunk = false;
    for line in payload.lines() {
        if line.starts_with("+++ ") || line.starts_with("--- ") {
            has_header = true;
        } else if HUNK_HEADER.is_match(line) {
            has_hunk = true;
        }
        if has_header && has_hunk {
            return true;
        }
    }
    false
}

/// The lines of a payload that are under review.
pub fn review_lines(payload: &str) -> Vec<ReviewLine<'_>> {
    let diff = is_unified_diff(payload);
    payload
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            if !diff {
                return Some(ReviewLine {
                    number: idx + 1,
                    text: line,
                });
            }
            if line.starts_with("+++") {
                return None;
            }
            line.strip_prefix('+').map(|added| ReviewLine {
                number: idx + 1,
                text: added,
            })
        })
        .collect()
}

/// The reviewed text of a payload, joined back together.
pub fn reviewable_text(payload: &str) -> String {
    review_lines(payload)
        .iter()
        .map(|l| l.text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether a line is a comment in one of the common languages.
pub fn is_comment(line: &str) -> bool {
    COMMENT_PREFIX.is_match(line)
}

/// How single quotes read in a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// `'` opens a char literal, or is a lifetime or label
    Rust,
    /// `'` opens a string when it closes on the same line
    Generic,
}

impl QuoteStyle {
    pub fn for_target(target: &str) -> Self {
        if target.ends_with(".rs") {
            QuoteStyle::Rust
        } else {
            QuoteStyle::Generic
        }
    }
}

/// Remove string and char literal contents from a line.
///
/// Quotes are kept so that the line shape survives; only their contents go.
/// A `"` or backtick string left open runs to the end of the line. A `'`
/// that never closes is kept as code.
pub fn strip_literals(line: &str, style: QuoteStyle) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if matches!(c, '"' | '`' | '\'') {
            match closing_quote(&chars, i, style) {
                Some(end) => {
                    out.push(c);
                    out.push(c);
                    i = end + 1;
                    continue;
                }
                None if c != '\'' => {
                    out.push(c);
                    break;
                }
                None => {}
            }
        }
        out.push(c);
        i += 1;
    }

    out
}

fn closing_quote(chars: &[char], open: usize, style: QuoteStyle) -> Option<usize> {
    let quote = chars[open];
    if quote == '\'' && style == QuoteStyle::Rust {
        return match chars.get(open + 1) {
            Some('\\') => (open + 3..chars.len()).find(|&j| chars[j] == '\''),
            Some(_) if chars.get(open + 2) == Some(&'\'') => Some(open + 2),
            _ => None,
        };
    }

    let mut escaped = false;
    for (j, &c) in chars.iter().enumerate().skip(open + 1) {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Some(j);
        }
    }
    None
}

/// Strip a trailing line comment (`//` or `#`) outside of literals.
pub fn strip_line_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev = '\0';
    for (idx, c) in line.char_indices() {
        match quote {
            Some(q) if c == q && prev != '\\' => quote = None,
            Some(_) => {}
            None if c == '"' => quote = Some(c),
            None if c == '/' && prev == '/' => return &line[..idx - 1],
            None if c == '#' && !matches!(line[idx + 1..].chars().next(), Some('[') | Some('!')) => {
                return &line[..idx]
            }
            None => {}
        }
        prev = c;
    }
    line
}
