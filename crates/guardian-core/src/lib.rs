//! # guardian-core
//!
//! Deterministic risk classification and policy compliance for proposed actions.
//!
//! This crate answers, for a single proposed action:
//! - How risky is it?
//! - Which policies does it violate, and how badly?
//! - May it proceed under the current enforcement mode?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same action and context always produce the same verdict
//! 2. **No I/O**: Evaluation never touches the filesystem or network
//! 3. **Traceable**: Every violation names its policy and, where possible, a location
//! 4. **Independent policies**: No validator reads another validator's output
//!
//! ## Example
//!
//! ```rust,ignore
//! use guardian_core::{assess, Action, ActionContext, PolicyConfig};
//!
//! let config = PolicyConfig::from_yaml_file("policy.yaml")?;
//! let action = Action::delete("/project/.env");
//! let verdict = assess(&config, &action, &ActionContext::new())?;
//!
//! println!("{} (score {})", verdict.risk.level, verdict.compliance.score);
//! ```

pub mod compliance;
pub mod config;
pub mod evidence;
pub mod policies;
pub mod risk;
pub mod types;

// Re-export main types at crate root
pub use compliance::{can_proceed, score_for, ComplianceEngine, ComplianceReport};
pub use config::{ConfigError, PolicyConfig};
pub use evidence::{Evidence, EvidenceSource};
pub use policies::PolicyValidator;
pub use risk::{RiskClassifier, RiskRule};
pub use types::{
    Action, ActionContext, ActionKind, EnforcementMode, PolicyId, RiskAssessment, RiskLevel,
    Severity, Violation,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during classification or evaluation
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Malformed action: {0}")]
    MalformedAction(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Risk and compliance of one action, computed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub risk: RiskAssessment,
    pub compliance: ComplianceReport,
}

/// Classify and evaluate an action under the configured mode.
///
/// Convenience entry point for one-off checks. Long-lived callers should
/// build a `RiskClassifier` and a `ComplianceEngine` once and reuse them.
///
/// # Arguments
///
/// * `config` - Policy configuration
/// * `action` - The proposed action
/// * `context` - Caller-supplied context
pub fn assess(
    config: &PolicyConfig,
    action: &Action,
    context: &ActionContext,
) -> Result<Verdict, EngineError> {
    let classifier = RiskClassifier::new(config)?;
    let engine = ComplianceEngine::new(config)?;

    let compliance = engine.evaluate(action, context, config.mode)?;
    let risk = classifier.assess(action);

    Ok(Verdict { risk, compliance })
}
