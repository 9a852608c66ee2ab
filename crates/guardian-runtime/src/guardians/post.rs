//! Post-guardian: quality gate on the produced result.
//!
//! **Question**: Is what the execution produced good enough to keep?
//!
//! | Tier | Condition | Decision |
//! |------|-----------|----------|
//! | EXCELLENT | no violations, density < 0.5, first attempt | APPROVE |
//! | GOOD | no HIGH or CRITICAL, ≤ 3 violations, score ≥ 80, within budget | APPROVE (with warnings if any) |
//! | ACCEPTABLE | no CRITICAL, ≤ 6 violations, score ≥ 60 | APPROVE_WITH_WARNING |
//! | POOR | no CRITICAL, thresholds breached | REJECT |
//! | UNACCEPTABLE | any CRITICAL | REJECT |

use std::sync::Arc;

use guardian_core::{
    Action, ActionContext, ComplianceEngine, ComplianceReport, EngineError, EnforcementMode,
    Severity,
};
use serde::{Deserialize, Serialize};

use crate::decision::{GuardianDecision, QualityTier};

pub const EXCELLENT_MAX_DENSITY: f64 = 0.5;
pub const GOOD_MAX_VIOLATIONS: usize = 3;
pub const GOOD_MIN_SCORE: f64 = 80.0;
pub const ACCEPTABLE_MAX_VIOLATIONS: usize = 6;
pub const ACCEPTABLE_MIN_SCORE: f64 = 60.0;

/// Post-guardian verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDecision {
    pub decision: GuardianDecision,
    pub quality: QualityTier,
    pub compliance: ComplianceReport,
}

pub struct PostGuardian {
    engine: Arc<ComplianceEngine>,
    max_attempts: u32,
}

impl PostGuardian {
    pub fn new(engine: Arc<ComplianceEngine>, max_attempts: u32) -> Self {
        Self {
            engine,
            max_attempts,
        }
    }

    /// Grade the produced result of an action.
    ///
    /// `produced` is the result viewed as an action (see `Action::produced`);
    /// `attempts` is how many attempts the execution took.
    pub fn decide(
        &self,
        produced: &Action,
        context: &ActionContext,
        mode: EnforcementMode,
        attempts: u32,
    ) -> Result<PostDecision, EngineError> {
        let compliance = self.engine.evaluate(produced, context, mode)?;
        let quality = grade(&compliance, attempts, self.max_attempts);

        let decision = match quality {
            QualityTier::Excellent => GuardianDecision::Approve,
            QualityTier::Good if compliance.is_clean() => GuardianDecision::Approve,
            QualityTier::Good | QualityTier::Acceptable => GuardianDecision::ApproveWithWarning {
                warnings: compliance.violations.iter().map(|v| v.to_string()).collect(),
            },
            QualityTier::Poor | QualityTier::Unacceptable => GuardianDecision::Reject {
                reason: rejection_reason(quality, &compliance),
            },
        };

        tracing::debug!(
            action_id = %produced.id,
            quality = %quality,
            score = compliance.score,
            violations = compliance.violations.len(),
            "Post-guardian graded result"
        );

        Ok(PostDecision {
            decision,
            quality,
            compliance,
        })
    }
}

/// Map a compliance report to a quality tier.
pub fn grade(compliance: &ComplianceReport, attempts: u32, max_attempts: u32) -> QualityTier {
    let count = compliance.violations.len();

    if compliance.has_critical() {
        QualityTier::Unacceptable
    } else if compliance.is_clean()
        && compliance.lazy_density < EXCELLENT_MAX_DENSITY
        && attempts <= 1
    {
        QualityTier::Excellent
    } else if compliance.count_at_least(Severity::High) == 0
        && count <= GOOD_MAX_VIOLATIONS
        && compliance.score >= GOOD_MIN_SCORE
        && attempts <= max_attempts
    {
        QualityTier::Good
    } else if count <= ACCEPTABLE_MAX_VIOLATIONS && compliance.score >= ACCEPTABLE_MIN_SCORE {
        QualityTier::Acceptable
    } else {
        QualityTier::Poor
    }
}

fn rejection_reason(quality: QualityTier, compliance: &ComplianceReport) -> String {
    let worst: Vec<String> = compliance
        .violations
        .iter()
        .filter(|v| Some(v.severity) == compliance.max_severity())
        .map(|v| v.to_string())
        .collect();
    format!(
        "result quality {} (score {:.0}): {}",
        quality,
        compliance.score,
        worst.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_core::{PolicyConfig, PolicyId, Violation};

    fn report(severities: &[Severity], density: f64) -> ComplianceReport {
        let violations = severities
            .iter()
            .map(|s| Violation::new(PolicyId::Traceability, *s, "finding"))
            .collect();
        ComplianceReport::from_violations(violations, EnforcementMode::Strict, density)
    }

    #[test]
    fn test_grade_boundaries() {
        assert_eq!(grade(&report(&[], 0.0), 1, 2), QualityTier::Excellent);
        assert_eq!(grade(&report(&[], 0.0), 2, 2), QualityTier::Good);
        assert_eq!(
            grade(&report(&[Severity::Medium; 3], 0.0), 1, 2),
            QualityTier::Good
        );
        // 4 violations exceed GOOD but stay above the ACCEPTABLE score
        assert_eq!(
            grade(&report(&[Severity::Low; 4], 0.0), 1, 2),
            QualityTier::Acceptable
        );
        assert_eq!(
            grade(&report(&[Severity::High], 0.0), 1, 2),
            QualityTier::Acceptable
        );
        assert_eq!(
            grade(&report(&[Severity::High; 3], 0.0), 1, 2),
            QualityTier::Poor
        );
        assert_eq!(
            grade(&report(&[Severity::Critical], 0.0), 1, 2),
            QualityTier::Unacceptable
        );
    }

    #[test]
    fn test_over_budget_is_not_good() {
        assert_eq!(
            grade(&report(&[Severity::Low], 0.0), 3, 2),
            QualityTier::Acceptable
        );
    }

    #[test]
    fn test_decisions() {
        let config = PolicyConfig::default();
        let guardian = PostGuardian::new(Arc::new(ComplianceEngine::new(&config).unwrap()), 2);
        let original = Action::edit("/project/src/lib.rs", "");

        let clean = guardian
            .decide(
                &original.produced("pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n"),
                &ActionContext::new(),
                EnforcementMode::Strict,
                1,
            )
            .unwrap();
        assert_eq!(clean.quality, QualityTier::Excellent);
        assert_eq!(clean.decision, GuardianDecision::Approve);

        let lazy = guardian
            .decide(
                &original.produced("fn a() {\n    todo!()\n}\nfn b() {\n    todo!()\n}\n"),
                &ActionContext::new(),
                EnforcementMode::Strict,
                1,
            )
            .unwrap();
        assert_eq!(lazy.quality, QualityTier::Unacceptable);
        assert!(matches!(
            lazy.decision,
            GuardianDecision::Reject { ref reason } if reason.contains("UNACCEPTABLE")
        ));
    }
}
