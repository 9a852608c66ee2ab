//! Core data model shared by the classifier, the validators and the guardians.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::evidence::Evidence;
use crate::EngineError;

/// The kind of operation an [`Action`] proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Edit,
    Delete,
    Execute,
    Batch,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Create => "create",
            ActionKind::Edit => "edit",
            ActionKind::Delete => "delete",
            ActionKind::Execute => "execute",
            ActionKind::Batch => "batch",
        };
        f.write_str(name)
    }
}

/// A single proposed operation.
///
/// Actions are immutable once submitted to a cycle. Every transformation
/// (`with_payload`, `corrected`) returns a new value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub kind: ActionKind,

    /// Path or identifier the action operates on. For `execute` this is the command line.
    pub target: String,

    /// Proposed content, diff or command text
    #[serde(default)]
    pub payload: String,

    /// Free-form caller metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Whether the caller holds a backup of the target
    #[serde(default)]
    pub backup_available: bool,

    /// Members of a `batch` action
    #[serde(default)]
    pub members: Vec<Action>,
}

impl Action {
    /// Create an action of the given kind against a target.
    pub fn new(kind: ActionKind, target: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target: target.into(),
            payload: String::new(),
            metadata: BTreeMap::new(),
            backup_available: false,
            members: Vec::new(),
        }
    }

    pub fn create(target: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(ActionKind::Create, target).with_payload(payload)
    }

    pub fn edit(target: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(ActionKind::Edit, target).with_payload(payload)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(ActionKind::Delete, target)
    }

    /// An `execute` action. The command line is both target and payload.
    pub fn execute(command: impl Into<String>) -> Self {
        let command = command.into();
        Self::new(ActionKind::Execute, command.clone()).with_payload(command)
    }

    pub fn batch(members: Vec<Action>) -> Self {
        let mut action = Self::new(ActionKind::Batch, format!("batch[{}]", members.len()));
        action.members = members;
        action
    }

    /// Return a copy of this action carrying a different payload.
    pub fn with_payload(&self, payload: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.payload = payload.into();
        next
    }

    pub fn with_backup(mut self) -> Self {
        self.backup_available = true;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// A fresh action derived from this one after a textual correction.
    ///
    /// The new action gets its own id and records the id it was derived from.
    pub fn corrected(&self, payload: impl Into<String>) -> Self {
        let mut next = self.with_payload(payload);
        next.id = Uuid::new_v4();
        next.metadata
            .insert("corrected_from".to_string(), self.id.to_string());
        next
    }

    /// The produced result of this action, viewed as an action for post-validation.
    pub fn produced(&self, content: impl Into<String>) -> Self {
        Self {
            id: self.id,
            kind: ActionKind::Create,
            target: self.target.clone(),
            payload: content.into(),
            metadata: self.metadata.clone(),
            backup_available: self.backup_available,
            members: Vec::new(),
        }
    }

    /// The non-batch actions this action is made of.
    pub fn leaves(&self) -> Vec<&Action> {
        match self.kind {
            ActionKind::Batch => self.members.iter().collect(),
            _ => vec![self],
        }
    }

    /// Check the structural invariants of an action.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self.kind {
            ActionKind::Batch => {
                if self.members.is_empty() {
                    return Err(EngineError::MalformedAction(
                        "batch action has no members".to_string(),
                    ));
                }
                for (idx, member) in self.members.iter().enumerate() {
                    if member.kind == ActionKind::Batch {
                        return Err(EngineError::MalformedAction(format!(
                            "batch member {} is itself a batch",
                            idx
                        )));
                    }
                    member.validate().map_err(|e| {
                        EngineError::MalformedAction(format!("batch member {}: {}", idx, e))
                    })?;
                }
                Ok(())
            }
            _ => {
                if self.target.trim().is_empty() {
                    return Err(EngineError::MalformedAction(format!(
                        "{} action has an empty target",
                        self.kind
                    )));
                }
                if !self.members.is_empty() {
                    return Err(EngineError::MalformedAction(format!(
                        "{} action carries batch members",
                        self.kind
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Caller-supplied context that travels with an action through a cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActionContext {
    pub metadata: BTreeMap<String, String>,

    /// 1-based attempt number this submission represents
    pub attempt: u32,

    /// Failures recorded for this target before this submission
    pub prior_failures: u32,

    /// Diagnosis written before a retry
    pub diagnosis: Option<String>,

    /// Rationale note for design decisions in the payload
    pub rationale: Option<String>,

    /// Symbols known to resolve, in addition to the configured set
    pub known_symbols: BTreeSet<String>,

    /// Previously accepted signatures for the target, keyed by symbol name
    pub prior_signatures: BTreeMap<String, String>,

    /// Auto-approve APPROVE_WITH_WARNING without a confirmation prompt
    pub skip_confirmation: bool,

    /// Ask an on-demand protection service to guard this submission
    pub protection_requested: bool,
}

impl Default for ActionContext {
    fn default() -> Self {
        Self {
            metadata: BTreeMap::new(),
            attempt: 1,
            prior_failures: 0,
            diagnosis: None,
            rationale: None,
            known_symbols: BTreeSet::new(),
            prior_signatures: BTreeMap::new(),
            skip_confirmation: false,
            protection_requested: false,
        }
    }
}

impl ActionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a retry following `prior_failures` failures.
    pub fn retry(attempt: u32, prior_failures: u32) -> Self {
        Self {
            attempt,
            prior_failures,
            ..Self::default()
        }
    }

    pub fn with_diagnosis(mut self, diagnosis: impl Into<String>) -> Self {
        self.diagnosis = Some(diagnosis.into());
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn with_prior_signature(
        mut self,
        name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        self.prior_signatures.insert(name.into(), signature.into());
        self
    }
}

/// Enforcement mode for the compliance verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    #[default]
    Strict,
    Soft,
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforcementMode::Strict => f.write_str("strict"),
            EnforcementMode::Soft => f.write_str("soft"),
        }
    }
}

/// Ordered risk level of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskLevel::Safe => "SAFE",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Risk classification of a single action. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub reasons: Vec<String>,
    pub reversible: bool,
    pub backup_available: bool,
}

/// Severity of a policy violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Identifier of the policy that produced a violation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyId {
    Completeness,
    ApiValidity,
    Skepticism,
    Traceability,
    SystemicImpact,
    IterationDiscipline,
    /// A caller-registered policy
    Custom(String),
}

impl PolicyId {
    /// The question each policy answers.
    pub fn question(&self) -> &str {
        match self {
            PolicyId::Completeness => "Is the proposed content complete, without placeholders?",
            PolicyId::ApiValidity => "Does every referenced API actually exist?",
            PolicyId::Skepticism => "Does the content repeat a known misconception?",
            PolicyId::Traceability => "Are non-trivial design decisions documented?",
            PolicyId::SystemicImpact => "Does the change break existing callers?",
            PolicyId::IterationDiscipline => "Was the failure diagnosed before retrying?",
            PolicyId::Custom(_) => "Custom policy",
        }
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyId::Completeness => f.write_str("completeness"),
            PolicyId::ApiValidity => f.write_str("api_validity"),
            PolicyId::Skepticism => f.write_str("skepticism"),
            PolicyId::Traceability => f.write_str("traceability"),
            PolicyId::SystemicImpact => f.write_str("systemic_impact"),
            PolicyId::IterationDiscipline => f.write_str("iteration_discipline"),
            PolicyId::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// A single policy-rule failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub source_policy: PolicyId,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
}

impl Violation {
    pub fn new(source_policy: PolicyId, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            source_policy,
            severity,
            message: message.into(),
            evidence: None,
        }
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = Some(evidence);
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}] {}", self.severity, self.source_policy, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_levels_are_ordered() {
        assert!(RiskLevel::Safe < RiskLevel::Low);
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn test_empty_target_is_malformed() {
        let action = Action::edit("  ", "content");
        assert!(matches!(
            action.validate(),
            Err(EngineError::MalformedAction(_))
        ));
    }

    #[test]
    fn test_empty_batch_is_malformed() {
        assert!(Action::batch(vec![]).validate().is_err());
    }

    #[test]
    fn test_nested_batch_is_malformed() {
        let inner = Action::batch(vec![Action::delete("/tmp/a")]);
        let outer = Action::batch(vec![inner]);
        assert!(outer.validate().is_err());
    }

    #[test]
    fn test_corrected_action_gets_new_id() {
        let action = Action::create("/project/a.rs", "todo!()");
        let fixed = action.corrected("fn a() {}");

        assert_ne!(fixed.id, action.id);
        assert_eq!(fixed.payload, "fn a() {}");
        assert_eq!(
            fixed.metadata.get("corrected_from"),
            Some(&action.id.to_string())
        );
    }

    #[test]
    fn test_action_yaml_roundtrip_fills_defaults() {
        let action: Action = serde_yaml::from_str("kind: delete\ntarget: /project/.env\n").unwrap();
        assert_eq!(action.kind, ActionKind::Delete);
        assert!(action.payload.is_empty());
        assert!(action.validate().is_ok());
    }
}
