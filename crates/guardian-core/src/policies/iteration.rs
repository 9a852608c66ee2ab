//! Iteration-discipline validator.
//!
//! **Question**: Was the failure diagnosed before retrying?
//!
//! | Condition | Severity |
//! |-----------|----------|
//! | retry (attempt > 1) with no diagnosis and no recorded failure | MEDIUM |
//! | prior failure without a diagnosis | HIGH |
//! | attempt beyond the configured ceiling | CRITICAL |

use crate::evidence::Evidence;
use crate::types::{Action, ActionContext, PolicyId, Severity, Violation};

use super::PolicyValidator;

/// The iteration-discipline validator.
pub struct IterationDisciplineValidator {
    max_attempts: u32,
}

impl IterationDisciplineValidator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

impl PolicyValidator for IterationDisciplineValidator {
    fn policy_id(&self) -> PolicyId {
        PolicyId::IterationDiscipline
    }

    fn evaluate(&self, _action: &Action, context: &ActionContext) -> Vec<Violation> {
        let mut violations = Vec::new();
        let diagnosed = context
            .diagnosis
            .as_deref()
            .map(|d| !d.trim().is_empty())
            .unwrap_or(false);

        if !diagnosed {
            if context.prior_failures > 0 {
                violations.push(
                    Violation::new(
                        PolicyId::IterationDiscipline,
                        Severity::High,
                        format!(
                            "Retry after {} failure(s) without a diagnosis",
                            context.prior_failures
                        ),
                    )
                    .with_evidence(Evidence::from_context("diagnosis skipped", "diagnosis")),
                );
            } else if context.attempt > 1 {
                violations.push(
                    Violation::new(
                        PolicyId::IterationDiscipline,
                        Severity::Medium,
                        format!("Attempt {} without a recorded diagnosis", context.attempt),
                    )
                    .with_evidence(Evidence::from_context("diagnosis missing", "diagnosis")),
                );
            }
        }

        if context.attempt > self.max_attempts {
            violations.push(
                Violation::new(
                    PolicyId::IterationDiscipline,
                    Severity::Critical,
                    format!(
                        "Attempt {} exceeds the ceiling of {} attempts",
                        context.attempt, self.max_attempts
                    ),
                )
                .with_evidence(Evidence::from_context("attempt ceiling", "attempt")),
            );
        }

        violations
    }
}
