//! Auto-protection: a long-lived service that routes submissions through the
//! coordinator, applies the configured correction strategy and records every
//! decision in the audit log.

mod audit;
mod correction;
mod service;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use audit::{
    AuditError, AuditLog, AuditSink, CorrectionRecord, EventStatus, JsonlAuditSink,
    ProtectionEvent,
};
pub use correction::{propose, Fix, FixKind};
pub use service::{ProtectionOutcome, ProtectionService};

/// Which submissions the service guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionMode {
    /// Every submission
    #[default]
    AlwaysOn,
    /// Only submissions whose context asks for protection
    OnDemand,
    /// None
    Disabled,
}

impl fmt::Display for ProtectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionMode::AlwaysOn => f.write_str("always_on"),
            ProtectionMode::OnDemand => f.write_str("on_demand"),
            ProtectionMode::Disabled => f.write_str("disabled"),
        }
    }
}

/// What the service does with a rejected submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionStrategy {
    /// Never modify the action
    #[default]
    RejectOnly,
    /// Apply a deterministic fix and resubmit once
    AutoFixSimple,
    /// Propose a fix and wait for approval before resubmitting
    SuggestAndWait,
}

impl fmt::Display for CorrectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrectionStrategy::RejectOnly => f.write_str("reject_only"),
            CorrectionStrategy::AutoFixSimple => f.write_str("auto_fix_simple"),
            CorrectionStrategy::SuggestAndWait => f.write_str("suggest_and_wait"),
        }
    }
}
