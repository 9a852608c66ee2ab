//! Terminal report of one coordination cycle.

use std::fmt;

use chrono::{DateTime, Utc};
use guardian_core::{ComplianceReport, RiskAssessment};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::{EscalationResolution, GuardianDecision, QualityTier, RuntimeInterrupt};
use crate::execution::ExecutionOutput;

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    /// Executed and the result passed the post-guardian
    Completed,
    /// Stopped by the pre-guardian, an escalation or the post-guardian
    Rejected,
    /// Stopped by the runtime guardian during execution
    Interrupted,
    /// Ran without guardians because protection was not engaged
    Bypassed,
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStatus::Completed => "COMPLETED",
            CycleStatus::Rejected => "REJECTED",
            CycleStatus::Interrupted => "INTERRUPTED",
            CycleStatus::Bypassed => "BYPASSED",
        };
        f.write_str(name)
    }
}

/// Which guardian produced a compliance report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pre,
    Post,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub compliance: ComplianceReport,
}

/// Everything that happened in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub action_id: Uuid,
    pub target: String,
    pub status: CycleStatus,

    /// Absent for bypassed cycles
    pub risk: Option<RiskAssessment>,
    pub pre_decision: Option<GuardianDecision>,

    /// Human answer to an escalation or a warning confirmation
    pub escalation: Option<EscalationResolution>,
    pub interrupts: Vec<RuntimeInterrupt>,

    /// Absent when execution never produced a result
    pub post_decision: Option<GuardianDecision>,
    pub quality: Option<QualityTier>,
    pub compliance_reports: Vec<PhaseReport>,

    pub attempts: u32,
    pub output: Option<ExecutionOutput>,

    /// Last execution failure, if the cycle ended on one
    pub error: Option<String>,

    /// Whether APPROVE_WITH_WARNING was accepted without asking a human
    pub warnings_acknowledged: bool,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CycleReport {
    pub(crate) fn new(action_id: Uuid, target: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            action_id,
            target: target.to_string(),
            status: CycleStatus::Rejected,
            risk: None,
            pre_decision: None,
            escalation: None,
            interrupts: Vec::new(),
            post_decision: None,
            quality: None,
            compliance_reports: Vec::new(),
            attempts: 0,
            output: None,
            error: None,
            warnings_acknowledged: false,
            started_at,
            finished_at: started_at,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == CycleStatus::Completed
    }

    /// Whether the pre-decision carried warnings a UI layer should surface.
    pub fn requires_confirmation(&self) -> bool {
        matches!(
            self.pre_decision,
            Some(GuardianDecision::ApproveWithWarning { .. })
        ) && !self.warnings_acknowledged
    }

    /// The compliance report of a phase.
    pub fn compliance(&self, phase: Phase) -> Option<&ComplianceReport> {
        self.compliance_reports
            .iter()
            .find(|r| r.phase == phase)
            .map(|r| &r.compliance)
    }

    /// Human-readable reason the cycle did not complete.
    pub fn rejection_reason(&self) -> Option<String> {
        match self.status {
            CycleStatus::Completed | CycleStatus::Bypassed => None,
            CycleStatus::Interrupted => self
                .interrupts
                .last()
                .map(|i| i.to_string())
                .or_else(|| self.error.clone()),
            CycleStatus::Rejected => {
                if let Some(reason) = self.post_decision.as_ref().and_then(|d| d.reason()) {
                    return Some(reason.to_string());
                }
                match &self.escalation {
                    Some(EscalationResolution::Rejected { reason }) => {
                        return Some(format!("rejected by reviewer: {}", reason))
                    }
                    Some(EscalationResolution::TimedOut) => {
                        return Some("no reviewer answer before the timeout".to_string())
                    }
                    _ => {}
                }
                self.pre_decision
                    .as_ref()
                    .and_then(|d| d.reason())
                    .map(str::to_string)
                    .or_else(|| self.error.clone())
            }
        }
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        let mut summary = format!("{} {}", self.status, self.target);
        if let Some(risk) = &self.risk {
            summary.push_str(&format!(" risk={}", risk.level));
        }
        if let Some(quality) = self.quality {
            summary.push_str(&format!(" quality={}", quality));
        }
        if self.attempts > 0 {
            summary.push_str(&format!(" attempts={}", self.attempts));
        }
        if let Some(reason) = self.rejection_reason() {
            summary.push_str(&format!(": {}", reason));
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn report() -> CycleReport {
        CycleReport::new(Uuid::new_v4(), "/project/.env", Utc::now())
    }

    #[test]
    fn test_rejection_reason_prefers_escalation_outcome() {
        let mut report = report();
        report.pre_decision = Some(GuardianDecision::Escalate {
            reason: "risk CRITICAL".to_string(),
            timeout: Duration::from_secs(300),
        });
        report.escalation = Some(EscalationResolution::TimedOut);

        assert_eq!(
            report.rejection_reason().as_deref(),
            Some("no reviewer answer before the timeout")
        );
    }

    #[test]
    fn test_interrupted_summary() {
        let mut report = report();
        report.status = CycleStatus::Interrupted;
        report.attempts = 2;
        report.interrupts.push(RuntimeInterrupt::Timeout);

        assert_eq!(report.summary(), "INTERRUPTED /project/.env attempts=2: TIMEOUT");
    }

    #[test]
    fn test_requires_confirmation() {
        let mut report = report();
        report.pre_decision = Some(GuardianDecision::ApproveWithWarning {
            warnings: vec!["edit of an existing file".to_string()],
        });
        assert!(report.requires_confirmation());

        report.warnings_acknowledged = true;
        assert!(!report.requires_confirmation());
    }

    #[test]
    fn test_status_serializes_screaming() {
        let json = serde_json::to_value(CycleStatus::Interrupted).unwrap();
        assert_eq!(json, "INTERRUPTED");
    }
}
