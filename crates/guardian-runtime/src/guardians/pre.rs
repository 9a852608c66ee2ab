//! Pre-guardian: the gate before execution.
//!
//! **Question**: May this action run at all, and does a human need to see it first?
//!
//! | Risk | can_proceed | Decision |
//! |------|-------------|----------|
//! | SAFE / LOW | yes | APPROVE |
//! | MEDIUM | yes | APPROVE_WITH_WARNING |
//! | HIGH / CRITICAL | any | ESCALATE with a channel, else REJECT |
//! | any | no | ESCALATE with a channel, else REJECT |

use std::sync::Arc;
use std::time::Duration;

use guardian_core::{
    Action, ActionContext, ComplianceEngine, ComplianceReport, EngineError, EnforcementMode,
    RiskAssessment, RiskClassifier, RiskLevel,
};
use serde::{Deserialize, Serialize};

use crate::decision::GuardianDecision;

/// Pre-guardian verdict with the inputs it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreDecision {
    pub decision: GuardianDecision,
    pub risk: RiskAssessment,
    pub compliance: ComplianceReport,
}

pub struct PreGuardian {
    classifier: RiskClassifier,
    engine: Arc<ComplianceEngine>,
}

impl PreGuardian {
    pub fn new(classifier: RiskClassifier, engine: Arc<ComplianceEngine>) -> Self {
        Self { classifier, engine }
    }

    /// Decide whether `action` may proceed to execution.
    ///
    /// # Arguments
    ///
    /// * `action` - The proposed action
    /// * `context` - Caller-supplied context
    /// * `mode` - Enforcement mode
    /// * `channel_available` - Whether a human channel can take an escalation
    /// * `escalation_timeout` - How long an escalation may wait
    pub fn decide(
        &self,
        action: &Action,
        context: &ActionContext,
        mode: EnforcementMode,
        channel_available: bool,
        escalation_timeout: Duration,
    ) -> Result<PreDecision, EngineError> {
        let compliance = self.engine.evaluate(action, context, mode)?;
        let risk = self.classifier.assess(action);

        let decision = if !compliance.can_proceed || risk.level >= RiskLevel::High {
            let reason = blocking_reason(&risk, &compliance);
            if channel_available {
                GuardianDecision::Escalate {
                    reason,
                    timeout: escalation_timeout,
                }
            } else {
                GuardianDecision::Reject { reason }
            }
        } else if risk.level == RiskLevel::Medium {
            let warnings = risk
                .reasons
                .iter()
                .cloned()
                .chain(compliance.violations.iter().map(|v| v.to_string()))
                .collect();
            GuardianDecision::ApproveWithWarning { warnings }
        } else {
            GuardianDecision::Approve
        };

        tracing::debug!(
            action_id = %action.id,
            path = %action.target,
            risk = %risk.level,
            score = compliance.score,
            decision = %decision,
            "Pre-guardian decided"
        );

        Ok(PreDecision {
            decision,
            risk,
            compliance,
        })
    }
}

fn blocking_reason(risk: &RiskAssessment, compliance: &ComplianceReport) -> String {
    let mut parts = Vec::new();
    if risk.level >= RiskLevel::High {
        parts.push(format!("risk {}: {}", risk.level, risk.reasons.join("; ")));
    }
    if !compliance.can_proceed {
        let blocking: Vec<String> = compliance.blocking().iter().map(|v| v.to_string()).collect();
        parts.push(format!("compliance blocked: {}", blocking.join("; ")));
    }
    parts.join(" | ")
}
