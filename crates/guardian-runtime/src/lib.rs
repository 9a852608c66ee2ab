//! # guardian-runtime
//!
//! Guarded execution of proposed actions on top of `guardian-core`.
//!
//! This crate runs the three guardians around a caller-supplied execution
//! callback and keeps a long-lived protection service in front of them.
//!
//! ## Key Guarantees
//!
//! 1. **Fail-closed**: escalations and confirmations that get no answer resolve to REJECT
//! 2. **No side effects on rejection**: a rejected action never reaches the callback
//! 3. **Cooperative cancellation**: interrupts are signalled, never forced
//! 4. **Bounded correction**: at most one corrective resubmission per submission
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use guardian_runtime::{GuardianCoordinator, ProtectionService, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_file("guardian.yaml")?;
//! let coordinator = Arc::new(GuardianCoordinator::new(config)?);
//! let service = ProtectionService::start(coordinator, Vec::new());
//!
//! let outcome = service.submit(action, context, mode, Arc::new(executor)).await?;
//! println!("{}", outcome.report.summary());
//!
//! service.shutdown().await;
//! ```

pub mod channel;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod decision;
pub mod execution;
pub mod guardians;
pub mod iteration;
pub mod locks;
pub mod protection;
pub mod report;
pub mod resilience;

pub use channel::{AutoDenyChannel, ChannelError, ChannelResponse, HumanChannel, ReviewKind, ReviewRequest};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RuntimeConfig;
pub use coordinator::{CoordinatorBuilder, GuardianCoordinator};
pub use decision::{EscalationResolution, GuardianDecision, QualityTier, RuntimeInterrupt};
pub use execution::{AttemptReporter, ExecutionCallback, ExecutionFailure, ExecutionOutput};
pub use guardians::{PostDecision, PostGuardian, PreDecision, PreGuardian, RuntimeGuardian};
pub use iteration::{normalize_error, ErrorFingerprint, IterationState};
pub use protection::{
    AuditError, AuditLog, AuditSink, CorrectionRecord, CorrectionStrategy, EventStatus, Fix,
    FixKind, JsonlAuditSink, ProtectionEvent, ProtectionMode, ProtectionOutcome,
    ProtectionService,
};
pub use report::{CycleReport, CycleStatus, Phase, PhaseReport};

use guardian_core::{ConfigError, EngineError};
use thiserror::Error;

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Protection service is not running")]
    ServiceStopped,

    #[error("Protection service is shutting down")]
    ShuttingDown,

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}
