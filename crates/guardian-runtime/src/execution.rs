//! Execution callback contract.
//!
//! The caller supplies an `ExecutionCallback` that performs the action. The
//! coordinator invokes it once per attempt, at most `max_attempts` times, and
//! hands it an `AttemptReporter`: the only way the callback can talk to the
//! runtime guardian.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use guardian_core::{Action, Violation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decision::RuntimeInterrupt;
use crate::guardians::RuntimeGuardian;

/// Result of a successful attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// Produced content, graded by the post-guardian
    pub content: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ExecutionOutput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// A failed attempt. The message is fingerprinted for circular-error detection.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ExecutionFailure {
    pub message: String,
}

impl ExecutionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Performs an approved action.
///
/// `action` is the action the guardians approved, which may be a corrected
/// copy of the one submitted. Implementations must tolerate being called
/// again after a failed attempt, and should call `reporter.checkpoint()`
/// between units of work.
#[async_trait]
pub trait ExecutionCallback: Send + Sync {
    async fn execute(
        &self,
        action: &Action,
        reporter: &AttemptReporter,
        attempt: u32,
    ) -> Result<ExecutionOutput, ExecutionFailure>;
}

/// Narrow reporting handle given to the execution callback.
#[derive(Clone)]
pub struct AttemptReporter {
    guardian: Arc<RuntimeGuardian>,
}

impl AttemptReporter {
    pub(crate) fn new(guardian: Arc<RuntimeGuardian>) -> Self {
        Self { guardian }
    }

    /// The interrupt the callback should stop for, if any.
    pub fn checkpoint(&self) -> Option<RuntimeInterrupt> {
        self.guardian.should_interrupt()
    }

    /// Report a violation found while executing. Returns true when it is CRITICAL.
    pub fn report_violation(&self, violation: Violation) -> bool {
        self.guardian.report_violation(violation)
    }

    /// Report produced output. Returns true once the output budget is exceeded.
    pub fn report_output_bytes(&self, bytes: u64) -> bool {
        self.guardian.report_output_bytes(bytes)
    }

    /// Whether the coordinator asked the callback to stop.
    pub fn is_cancelled(&self) -> bool {
        self.guardian.is_cancelled()
    }
}
