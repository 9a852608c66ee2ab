//! Compliance aggregation.
//!
//! The engine runs every validator over an action, concatenates their
//! violations, and turns them into a score and a proceed/block verdict.
//!
//! ## Scoring
//!
//! `score = 100 - Σ min(count, 3) × weight(severity)`, clamped to [0, 100].
//! Each severity bucket contributes at most `BUCKET_CAP_MULTIPLIER` times its
//! weight.
//!
//! ## Verdict
//!
//! | Mode | Blocks on |
//! |------|-----------|
//! | strict | any CRITICAL violation |
//! | soft | CRITICAL violations from the policies in `SOFT_MODE_BLOCKING` |

use serde::{Deserialize, Serialize};

use crate::config::PolicyConfig;
use crate::evidence::EvidenceSource;
use crate::policies::{
    lazy_density, ApiValidityValidator, CompletenessValidator, IterationDisciplineValidator,
    PolicyValidator, SkepticismValidator, SystemicImpactValidator, TraceabilityValidator,
};
use crate::types::{
    Action, ActionContext, ActionKind, EnforcementMode, PolicyId, Severity, Violation,
};
use crate::EngineError;

pub const SEVERITY_WEIGHT_CRITICAL: f64 = 40.0;
pub const SEVERITY_WEIGHT_HIGH: f64 = 15.0;
pub const SEVERITY_WEIGHT_MEDIUM: f64 = 5.0;
pub const SEVERITY_WEIGHT_LOW: f64 = 1.0;

/// Hits per severity bucket that still lower the score.
pub const BUCKET_CAP_MULTIPLIER: usize = 3;

pub const MAX_SCORE: f64 = 100.0;

/// Policies whose CRITICAL violations still block in soft mode.
pub const SOFT_MODE_BLOCKING: [PolicyId; 3] = [
    PolicyId::Completeness,
    PolicyId::ApiValidity,
    PolicyId::IterationDiscipline,
];

/// Score weight of one violation of the given severity.
pub fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => SEVERITY_WEIGHT_CRITICAL,
        Severity::High => SEVERITY_WEIGHT_HIGH,
        Severity::Medium => SEVERITY_WEIGHT_MEDIUM,
        Severity::Low => SEVERITY_WEIGHT_LOW,
    }
}

/// Compliance score of a multiset of severities.
pub fn score_for<I>(severities: I) -> f64
where
    I: IntoIterator<Item = Severity>,
{
    let mut counts = [0usize; 4];
    for severity in severities {
        counts[severity as usize] += 1;
    }

    let penalty: f64 = [Severity::Low, Severity::Medium, Severity::High, Severity::Critical]
        .iter()
        .map(|s| counts[*s as usize].min(BUCKET_CAP_MULTIPLIER) as f64 * severity_weight(*s))
        .sum();

    (MAX_SCORE - penalty).clamp(0.0, MAX_SCORE)
}

/// Whether a set of violations allows the action to proceed under `mode`.
pub fn can_proceed(violations: &[Violation], mode: EnforcementMode) -> bool {
    !violations
        .iter()
        .any(|v| v.is_critical() && blocks_in(&v.source_policy, mode))
}

fn blocks_in(policy: &PolicyId, mode: EnforcementMode) -> bool {
    match mode {
        EnforcementMode::Strict => true,
        EnforcementMode::Soft => SOFT_MODE_BLOCKING.contains(policy),
    }
}

/// Result of one compliance evaluation.
///
/// CRITICAL violations are always listed, whatever the mode; only
/// `can_proceed` depends on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub mode: EnforcementMode,
    pub violations: Vec<Violation>,
    pub score: f64,
    pub can_proceed: bool,
    /// Lazy markers per 100 reviewed lines (maximum over batch members)
    pub lazy_density: f64,
}

impl ComplianceReport {
    /// Build a report from already collected violations.
    pub fn from_violations(
        violations: Vec<Violation>,
        mode: EnforcementMode,
        lazy_density: f64,
    ) -> Self {
        let score = score_for(violations.iter().map(|v| v.severity));
        let can_proceed = can_proceed(&violations, mode);
        Self {
            mode,
            violations,
            score,
            can_proceed,
            lazy_density,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn has_critical(&self) -> bool {
        self.violations.iter().any(Violation::is_critical)
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.violations.iter().map(|v| v.severity).max()
    }

    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity >= severity)
            .count()
    }

    /// The violations that make `can_proceed` false.
    pub fn blocking(&self) -> Vec<&Violation> {
        self.violations
            .iter()
            .filter(|v| v.is_critical() && blocks_in(&v.source_policy, self.mode))
            .collect()
    }
}

/// Runs the ordered validator set.
pub struct ComplianceEngine {
    validators: Vec<Box<dyn PolicyValidator>>,
    default_mode: EnforcementMode,
}

impl ComplianceEngine {
    /// Build the engine with the six standard validators, in evaluation order.
    pub fn new(config: &PolicyConfig) -> Result<Self, EngineError> {
        let validators: Vec<Box<dyn PolicyValidator>> = vec![
            Box::new(CompletenessValidator::new(&config.completeness)),
            Box::new(ApiValidityValidator::new(&config.api)?),
            Box::new(SkepticismValidator::new(&config.skepticism)?),
            Box::new(TraceabilityValidator::new()),
            Box::new(SystemicImpactValidator::new()),
            Box::new(IterationDisciplineValidator::new(config.max_attempts)),
        ];

        Ok(Self {
            validators,
            default_mode: config.mode,
        })
    }

    /// Append a validator after the standard set.
    pub fn with_validator(mut self, validator: Box<dyn PolicyValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// The mode configured for this engine.
    pub fn default_mode(&self) -> EnforcementMode {
        self.default_mode
    }

    /// Policies in evaluation order.
    pub fn policies(&self) -> Vec<PolicyId> {
        self.validators.iter().map(|v| v.policy_id()).collect()
    }

    /// Evaluate an action under `mode`.
    ///
    /// # Arguments
    ///
    /// * `action` - The action (or produced result) to evaluate
    /// * `context` - Caller-supplied context
    /// * `mode` - Enforcement mode for the verdict
    ///
    /// # Returns
    ///
    /// A `ComplianceReport`, or `EngineError::MalformedAction` when the action
    /// is structurally invalid. A malformed action never yields a verdict.
    pub fn evaluate(
        &self,
        action: &Action,
        context: &ActionContext,
        mode: EnforcementMode,
    ) -> Result<ComplianceReport, EngineError> {
        action.validate()?;

        let leaves = action.leaves();
        let batched = action.kind == ActionKind::Batch;
        let mut violations: Vec<Violation> = Vec::new();

        for validator in &self.validators {
            let mut hits = 0usize;
            for (index, leaf) in leaves.iter().enumerate() {
                for mut violation in validator.evaluate(leaf, context) {
                    hits += 1;
                    let shared = violation
                        .evidence
                        .as_ref()
                        .is_some_and(|e| e.source == EvidenceSource::Context);
                    if shared {
                        // Context findings repeat identically for every batch member
                        if violations.contains(&violation) {
                            continue;
                        }
                    } else if batched {
                        if let Some(evidence) = violation.evidence.as_mut() {
                            evidence.scope_to_member(index);
                        }
                    }
                    violations.push(violation);
                }
            }
            tracing::debug!(
                policy = %validator.policy_id(),
                hits,
                "validator evaluated"
            );
        }

        let density = leaves
            .iter()
            .map(|leaf| lazy_density(&leaf.payload))
            .fold(0.0_f64, f64::max);

        Ok(ComplianceReport::from_violations(violations, mode, density))
    }
}
