//! Decisions, quality tiers and interrupts produced by the guardians.

use std::fmt;
use std::time::Duration;

use guardian_core::Violation;
use serde::{Deserialize, Serialize};

use crate::config::duration_human;
use crate::iteration::ErrorFingerprint;

/// Routing decision of the pre- or post-guardian.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardianDecision {
    Approve,
    Reject {
        reason: String,
    },
    ApproveWithWarning {
        warnings: Vec<String>,
    },
    Escalate {
        reason: String,
        #[serde(with = "duration_human")]
        timeout: Duration,
    },
}

impl GuardianDecision {
    /// APPROVE or APPROVE_WITH_WARNING.
    pub fn is_approval(&self) -> bool {
        matches!(
            self,
            GuardianDecision::Approve | GuardianDecision::ApproveWithWarning { .. }
        )
    }

    /// Human-readable reason for a non-approval.
    pub fn reason(&self) -> Option<&str> {
        match self {
            GuardianDecision::Reject { reason } | GuardianDecision::Escalate { reason, .. } => {
                Some(reason)
            }
            _ => None,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            GuardianDecision::ApproveWithWarning { warnings } => warnings,
            _ => &[],
        }
    }
}

impl fmt::Display for GuardianDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardianDecision::Approve => f.write_str("APPROVE"),
            GuardianDecision::Reject { reason } => write!(f, "REJECT ({})", reason),
            GuardianDecision::ApproveWithWarning { warnings } => {
                write!(f, "APPROVE_WITH_WARNING ({} warning(s))", warnings.len())
            }
            GuardianDecision::Escalate { reason, timeout } => write!(
                f,
                "ESCALATE ({}, timeout {})",
                reason,
                humantime::format_duration(*timeout)
            ),
        }
    }
}

/// Quality of a produced result, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTier {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Unacceptable,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityTier::Excellent => "EXCELLENT",
            QualityTier::Good => "GOOD",
            QualityTier::Acceptable => "ACCEPTABLE",
            QualityTier::Poor => "POOR",
            QualityTier::Unacceptable => "UNACCEPTABLE",
        };
        f.write_str(name)
    }
}

/// Signal that ends the execution phase of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "interrupt", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeInterrupt {
    MaxIterationsExceeded { attempts: u32, max_attempts: u32 },
    CircularError { fingerprint: ErrorFingerprint },
    CriticalViolation { violation: Violation },
    Timeout,
    ResourceLimit { used: u64, limit: u64 },
}

impl RuntimeInterrupt {
    /// Stable name of the interrupt kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeInterrupt::MaxIterationsExceeded { .. } => "MAX_ITERATIONS_EXCEEDED",
            RuntimeInterrupt::CircularError { .. } => "CIRCULAR_ERROR",
            RuntimeInterrupt::CriticalViolation { .. } => "CRITICAL_VIOLATION",
            RuntimeInterrupt::Timeout => "TIMEOUT",
            RuntimeInterrupt::ResourceLimit { .. } => "RESOURCE_LIMIT",
        }
    }
}

impl fmt::Display for RuntimeInterrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeInterrupt::MaxIterationsExceeded {
                attempts,
                max_attempts,
            } => write!(
                f,
                "MAX_ITERATIONS_EXCEEDED ({} attempts, ceiling {})",
                attempts, max_attempts
            ),
            RuntimeInterrupt::CircularError { fingerprint } => {
                write!(f, "CIRCULAR_ERROR ({})", fingerprint)
            }
            RuntimeInterrupt::CriticalViolation { violation } => {
                write!(f, "CRITICAL_VIOLATION ({})", violation)
            }
            RuntimeInterrupt::Timeout => f.write_str("TIMEOUT"),
            RuntimeInterrupt::ResourceLimit { used, limit } => {
                write!(f, "RESOURCE_LIMIT ({} of {} bytes)", used, limit)
            }
        }
    }
}

/// Outcome of asking a human to approve an escalation, a warning or a fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resolution", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationResolution {
    Approved,
    Rejected { reason: String },
    TimedOut,
}

impl EscalationResolution {
    pub fn is_approved(&self) -> bool {
        matches!(self, EscalationResolution::Approved)
    }
}

impl fmt::Display for EscalationResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationResolution::Approved => f.write_str("approved"),
            EscalationResolution::Rejected { reason } => write!(f, "rejected: {}", reason),
            EscalationResolution::TimedOut => f.write_str("timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approvals() {
        assert!(GuardianDecision::Approve.is_approval());
        assert!(GuardianDecision::ApproveWithWarning { warnings: vec![] }.is_approval());
        assert!(!GuardianDecision::Reject {
            reason: "no".to_string()
        }
        .is_approval());
        assert!(!GuardianDecision::Escalate {
            reason: "risky".to_string(),
            timeout: Duration::from_secs(1)
        }
        .is_approval());
    }

    #[test]
    fn test_decision_serializes_tagged() {
        let decision = GuardianDecision::Escalate {
            reason: "risk HIGH".to_string(),
            timeout: Duration::from_secs(300),
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["decision"], "ESCALATE");
        assert_eq!(json["timeout"], "5m");
    }

    #[test]
    fn test_quality_order() {
        assert!(QualityTier::Excellent < QualityTier::Good);
        assert!(QualityTier::Poor < QualityTier::Unacceptable);
    }
}
