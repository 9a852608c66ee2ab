//! Risk classification of proposed actions.
//!
//! `RiskClassifier::assess` is pure and total: the same action always yields
//! the same assessment, and every action yields one. Reasons are the
//! `Display` text of the matched [`RiskRule`]s, in match order, so they are
//! stable across runs.
//!
//! | Rule | Level |
//! |------|-------|
//! | read-only command | SAFE |
//! | mutating operation on a non-critical, non-system path | LOW |
//! | edit or delete of an existing file | MEDIUM |
//! | destructive command, critical pattern, protected extension, system path | HIGH |
//! | delete of a critical target | CRITICAL |
//!
//! A batch takes the maximum level of its members.

use std::fmt;

use glob::Pattern;
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::PolicyConfig;
use crate::types::{Action, ActionKind, RiskAssessment, RiskLevel};
use crate::EngineError;

lazy_static! {
    /// Commands that only read state.
    static ref READ_ONLY_COMMANDS: Vec<&'static str> = vec![
        "ls", "cat", "head", "tail", "less", "grep", "rg", "pwd", "echo", "wc",
        "which", "whoami", "stat", "file", "du", "df", "tree", "printenv",
    ];

    /// Shell operators that chain or pipe commands.
    static ref COMMAND_SEPARATOR: Regex = Regex::new(r"&&|\|\||[;|&\n]").unwrap();

    /// Read-only subcommands of version control.
    static ref READ_ONLY_GIT: Vec<&'static str> = vec![
        "status", "diff", "log", "show", "blame", "branch",
    ];

    static ref DESTRUCTIVE_COMMANDS: Vec<(&'static str, Regex)> = vec![
        ("recursive force remove", Regex::new(r"\brm\s+(-[a-zA-Z]*r[a-zA-Z]*f|-[a-zA-Z]*f[a-zA-Z]*r|-r\s+-f|-f\s+-r|--recursive\s+--force)\b").unwrap()),
        ("filesystem format", Regex::new(r"\bmkfs(\.\w+)?\b").unwrap()),
        ("raw disk write", Regex::new(r"\bdd\s+.*\bof=").unwrap()),
        ("world-writable permissions", Regex::new(r"\bchmod\s+(-R\s+)?0?777\b").unwrap()),
        ("force push", Regex::new(r"\bgit\s+push\b.*(\s--force\b|\s-f\b)").unwrap()),
        ("history rewrite", Regex::new(r"\bgit\s+reset\s+--hard\b").unwrap()),
        ("database drop", Regex::new(r"(?i)\bdrop\s+(table|database|schema)\b").unwrap()),
        ("table truncation", Regex::new(r"(?i)\btruncate\s+table\b").unwrap()),
    ];
}

/// A classification rule that matched an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskRule {
    ReadOnlyCommand,
    MutatingOperation,
    EditExisting,
    DeleteExisting,
    DestructiveCommand(&'static str),
    CriticalPattern(String),
    ProtectedExtension(String),
    SystemPath(String),
    DeleteCritical,
}

impl RiskRule {
    pub fn level(&self) -> RiskLevel {
        match self {
            RiskRule::ReadOnlyCommand => RiskLevel::Safe,
            RiskRule::MutatingOperation => RiskLevel::Low,
            RiskRule::EditExisting | RiskRule::DeleteExisting => RiskLevel::Medium,
            RiskRule::DestructiveCommand(_)
            | RiskRule::CriticalPattern(_)
            | RiskRule::ProtectedExtension(_)
            | RiskRule::SystemPath(_) => RiskLevel::High,
            RiskRule::DeleteCritical => RiskLevel::Critical,
        }
    }
}

impl fmt::Display for RiskRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskRule::ReadOnlyCommand => f.write_str("read-only command"),
            RiskRule::MutatingOperation => {
                f.write_str("mutating operation on a non-critical, non-system path")
            }
            RiskRule::EditExisting => f.write_str("edit of an existing file"),
            RiskRule::DeleteExisting => f.write_str("delete of an existing file"),
            RiskRule::DestructiveCommand(name) => write!(f, "destructive command: {}", name),
            RiskRule::CriticalPattern(pattern) => {
                write!(f, "target matches critical pattern '{}'", pattern)
            }
            RiskRule::ProtectedExtension(ext) => {
                write!(f, "target has protected extension '.{}'", ext)
            }
            RiskRule::SystemPath(prefix) => write!(f, "target is under system path '{}'", prefix),
            RiskRule::DeleteCritical => f.write_str("delete of a critical target"),
        }
    }
}

/// Classifies actions by risk.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    critical_patterns: Vec<Pattern>,
    protected_extensions: Vec<String>,
    system_paths: Vec<String>,
    tracked_roots: Vec<String>,
}

impl RiskClassifier {
    /// Build a classifier from policy configuration.
    pub fn new(config: &PolicyConfig) -> Result<Self, EngineError> {
        let critical_patterns = config
            .critical_file_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| EngineError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            critical_patterns,
            protected_extensions: config
                .protected_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            system_paths: config.system_paths.iter().map(|p| normalize_path(p)).collect(),
            tracked_roots: config.tracked_roots.iter().map(|p| normalize_path(p)).collect(),
        })
    }

    /// Assess an action. Pure and total.
    pub fn assess(&self, action: &Action) -> RiskAssessment {
        if action.kind == ActionKind::Batch {
            return self.assess_batch(action);
        }

        let rules = self.matched_rules(action);
        let level = rules
            .iter()
            .map(RiskRule::level)
            .max()
            .unwrap_or(RiskLevel::Safe);

        let delete_critical = rules.contains(&RiskRule::DeleteCritical);
        let reversible = !delete_critical
            && ((action.kind == ActionKind::Edit && action.backup_available)
                || self.is_tracked(&action.target));

        RiskAssessment {
            level,
            reasons: rules.iter().map(|r| r.to_string()).collect(),
            reversible,
            backup_available: action.backup_available,
        }
    }

    /// Batch assessment takes the maximum member level, never an average.
    fn assess_batch(&self, action: &Action) -> RiskAssessment {
        if action.members.is_empty() {
            return RiskAssessment {
                level: RiskLevel::Safe,
                reasons: vec!["batch has no members".to_string()],
                reversible: true,
                backup_available: false,
            };
        }

        let mut level = RiskLevel::Safe;
        let mut reasons = Vec::new();
        let mut reversible = true;
        let mut backup_available = true;

        for (idx, member) in action.members.iter().enumerate() {
            let assessment = self.assess(member);
            level = level.max(assessment.level);
            reversible &= assessment.reversible;
            backup_available &= assessment.backup_available;
            reasons.extend(
                assessment
                    .reasons
                    .into_iter()
                    .map(|r| format!("member[{}]: {}", idx, r)),
            );
        }

        RiskAssessment {
            level,
            reasons,
            reversible,
            backup_available,
        }
    }

    fn matched_rules(&self, action: &Action) -> Vec<RiskRule> {
        let mut rules = Vec::new();

        let paths = match action.kind {
            ActionKind::Execute => command_paths(command_text(action)),
            _ => vec![action.target.as_str()],
        };
        let path_rules: Vec<RiskRule> = paths
            .iter()
            .flat_map(|p| self.path_rules(p))
            .fold(Vec::new(), |mut acc, rule| {
                if !acc.contains(&rule) {
                    acc.push(rule);
                }
                acc
            });

        match action.kind {
            ActionKind::Execute => {
                let command = command_text(action);
                let destructive: Vec<RiskRule> = DESTRUCTIVE_COMMANDS
                    .iter()
                    .filter(|(_, re)| re.is_match(command))
                    .map(|(name, _)| RiskRule::DestructiveCommand(*name))
                    .collect();

                if destructive.is_empty() && is_read_only(command) {
                    rules.push(RiskRule::ReadOnlyCommand);
                } else if path_rules.is_empty() && destructive.is_empty() {
                    rules.push(RiskRule::MutatingOperation);
                }
                rules.extend(path_rules);
                rules.extend(destructive);
            }
            ActionKind::Create => {
                if path_rules.is_empty() {
                    rules.push(RiskRule::MutatingOperation);
                }
                rules.extend(path_rules);
            }
            ActionKind::Edit => {
                rules.push(RiskRule::EditExisting);
                rules.extend(path_rules);
            }
            ActionKind::Delete => {
                rules.push(RiskRule::DeleteExisting);
                let critical = path_rules.iter().any(|r| {
                    matches!(r, RiskRule::CriticalPattern(_) | RiskRule::ProtectedExtension(_))
                });
                rules.extend(path_rules);
                if critical {
                    rules.push(RiskRule::DeleteCritical);
                }
            }
            ActionKind::Batch => {}
        }

        rules
    }

    fn path_rules(&self, raw: &str) -> Vec<RiskRule> {
        let path = normalize_path(raw);
        let name = file_name(&path);
        let mut rules = Vec::new();

        if let Some(pattern) = self
            .critical_patterns
            .iter()
            .find(|p| p.matches(name) || p.matches(&path))
        {
            rules.push(RiskRule::CriticalPattern(pattern.as_str().to_string()));
        }

        if let Some(ext) = extension(name) {
            if self.protected_extensions.iter().any(|e| *e == ext) {
                rules.push(RiskRule::ProtectedExtension(ext));
            }
        }

        if let Some(prefix) = self.system_paths.iter().find(|p| is_under(&path, p)) {
            rules.push(RiskRule::SystemPath(prefix.clone()));
        }

        rules
    }

    fn is_tracked(&self, target: &str) -> bool {
        let path = normalize_path(target);
        self.tracked_roots.iter().any(|root| is_under(&path, root))
    }
}

fn command_text(action: &Action) -> &str {
    if action.payload.trim().is_empty() {
        &action.target
    } else {
        &action.payload
    }
}

/// A command line is read-only when every chained or piped segment is.
fn is_read_only(command: &str) -> bool {
    if command.contains('>') || command.contains("$(") || command.contains('`') {
        return false;
    }

    let mut segments = COMMAND_SEPARATOR
        .split(command)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .peekable();
    segments.peek().is_some() && segments.all(is_read_only_segment)
}

fn is_read_only_segment(segment: &str) -> bool {
    let mut words = segment.split_whitespace();
    match words.next() {
        Some("git") => words.next().is_some_and(|sub| READ_ONLY_GIT.contains(&sub)),
        Some(first) => READ_ONLY_COMMANDS.contains(&first),
        None => false,
    }
}

/// Arguments of a command line that look like filesystem paths.
fn command_paths(command: &str) -> Vec<&str> {
    command
        .split_whitespace()
        .map(|w| w.trim_matches(|c| c == '"' || c == '\''))
        .filter(|w| {
            w.starts_with('/')
                || w.starts_with("~/")
                || w.starts_with("./")
                || w.contains(":\\")
                || w.contains(":/")
                || w.starts_with(".env")
        })
        .collect()
}

fn normalize_path(path: &str) -> String {
    let replaced = path.trim().replace('\\', "/");
    if replaced.len() > 1 {
        replaced.trim_end_matches('/').to_string()
    } else {
        replaced
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

fn is_under(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('/') || prefix.ends_with('/'))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn classifier() -> RiskClassifier {
        RiskClassifier::new(&PolicyConfig::default()).unwrap()
    }

    #[test]
    fn test_delete_env_is_critical_and_irreversible() {
        let assessment = classifier().assess(&Action::delete("/project/.env").with_backup());

        assert_eq!(assessment.level, RiskLevel::Critical);
        assert!(!assessment.reversible);
        assert!(assessment
            .reasons
            .contains(&"delete of a critical target".to_string()));
    }

    #[test]
    fn test_edit_of_regular_file_is_medium() {
        let assessment = classifier().assess(&Action::edit("/project/app.py", "x = 1\n"));
        assert_eq!(assessment.level, RiskLevel::Medium);
        assert_eq!(assessment.reasons, vec!["edit of an existing file".to_string()]);
        assert!(!assessment.reversible);
    }

    #[test]
    fn test_edit_with_backup_is_reversible() {
        let assessment =
            classifier().assess(&Action::edit("/project/app.py", "x = 1\n").with_backup());
        assert!(assessment.reversible);
        assert!(assessment.backup_available);
    }

    #[test]
    fn test_create_is_low() {
        let assessment = classifier().assess(&Action::create("/project/src/new.rs", "fn a() {}"));
        assert_eq!(assessment.level, RiskLevel::Low);
    }

    #[test]
    fn test_system_path_is_high() {
        let assessment = classifier().assess(&Action::edit("/etc/hosts", "127.0.0.1 x"));
        assert_eq!(assessment.level, RiskLevel::High);
        assert!(assessment
            .reasons
            .contains(&"target is under system path '/etc'".to_string()));
    }

    #[test]
    fn test_system_prefix_needs_separator() {
        let assessment = classifier().assess(&Action::create("/etcetera/notes.txt", "x"));
        assert_eq!(assessment.level, RiskLevel::Low);
    }

    #[test]
    fn test_protected_extension_edit_is_high() {
        let assessment = classifier().assess(&Action::edit("/project/certs/server.PEM", "..."));
        assert_eq!(assessment.level, RiskLevel::High);
    }

    #[test]
    fn test_windows_paths_are_normalized() {
        let assessment = classifier().assess(&Action::edit("C:\\Windows\\system.ini", "x"));
        assert_eq!(assessment.level, RiskLevel::High);
    }

    #[test]
    fn test_read_only_command_is_safe() {
        let assessment = classifier().assess(&Action::execute("git status"));
        assert_eq!(assessment.level, RiskLevel::Safe);
        assert_eq!(assessment.reasons, vec!["read-only command".to_string()]);
    }

    #[test]
    fn test_redirection_is_not_read_only() {
        let assessment = classifier().assess(&Action::execute("echo hi > notes.txt"));
        assert_eq!(assessment.level, RiskLevel::Low);
    }

    #[test]
    fn test_chained_commands_need_every_segment_read_only() {
        for command in [
            "ls && rm notes.txt",
            "cat a.txt | tee b.txt",
            "grep -l x . | xargs touch",
            "pwd; mv a b",
            "ls || cp a b",
            "ls $(touch x)",
        ] {
            let assessment = classifier().assess(&Action::execute(command));
            assert_eq!(assessment.level, RiskLevel::Low, "{}", command);
            assert!(
                !assessment.reasons.contains(&"read-only command".to_string()),
                "{}",
                command
            );
        }

        let piped = classifier().assess(&Action::execute("git log --oneline | head -5"));
        assert_eq!(piped.level, RiskLevel::Safe);
        assert_eq!(piped.reasons, vec!["read-only command".to_string()]);
    }

    #[test]
    fn test_destructive_command_is_high() {
        let assessment = classifier().assess(&Action::execute("rm -rf build"));
        assert_eq!(assessment.level, RiskLevel::High);
        assert!(assessment
            .reasons
            .contains(&"destructive command: recursive force remove".to_string()));
    }

    #[test]
    fn test_command_touching_system_path_is_high() {
        let assessment = classifier().assess(&Action::execute("cp build/app /usr/local/bin/app"));
        assert_eq!(assessment.level, RiskLevel::High);
    }

    #[test]
    fn test_tracked_root_is_reversible() {
        let config = PolicyConfig {
            tracked_roots: vec!["/project".to_string()],
            ..PolicyConfig::default()
        };
        let classifier = RiskClassifier::new(&config).unwrap();
        let assessment = classifier.assess(&Action::create("/project/src/a.rs", "x"));
        assert!(assessment.reversible);

        // Deleting a critical target stays irreversible even when tracked
        let assessment = classifier.assess(&Action::delete("/project/.env"));
        assert!(!assessment.reversible);
    }

    #[test]
    fn test_batch_takes_maximum() {
        let batch = Action::batch(vec![
            Action::create("/project/a.rs", "x"),
            Action::edit("/project/b.rs", "y"),
            Action::delete("/project/.env"),
        ]);
        let assessment = classifier().assess(&batch);

        assert_eq!(assessment.level, RiskLevel::Critical);
        assert!(assessment.reasons[0].starts_with("member[0]: "));
        assert!(!assessment.reversible);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = PolicyConfig {
            critical_file_patterns: vec!["[oops".to_string()],
            ..PolicyConfig::default()
        };
        assert!(matches!(
            RiskClassifier::new(&config),
            Err(EngineError::InvalidPattern { .. })
        ));
    }

    fn arb_action() -> impl Strategy<Value = Action> {
        let targets = prop::sample::select(vec![
            "/project/app.py",
            "/project/.env",
            "/etc/passwd",
            "/project/keys/server.pem",
            "/project/README.md",
        ]);
        let kinds = prop::sample::select(vec![
            ActionKind::Create,
            ActionKind::Edit,
            ActionKind::Delete,
        ]);
        (kinds, targets, any::<bool>()).prop_map(|(kind, target, backup)| {
            let mut action = Action::new(kind, target);
            action.backup_available = backup;
            action
        })
    }

    proptest! {
        #[test]
        fn prop_assess_is_idempotent(action in arb_action()) {
            let classifier = classifier();
            prop_assert_eq!(classifier.assess(&action), classifier.assess(&action));
        }

        #[test]
        fn prop_batch_level_is_member_maximum(members in prop::collection::vec(arb_action(), 1..6)) {
            let classifier = classifier();
            let expected = members
                .iter()
                .map(|m| classifier.assess(m).level)
                .max()
                .unwrap();
            let batch = Action::batch(members);
            prop_assert_eq!(classifier.assess(&batch).level, expected);
        }
    }
}
