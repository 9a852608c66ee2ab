//! Policy validators.
//!
//! Each validator answers one question about a proposed action. Validators
//! are stateless and independent: none reads another's output, so the
//! engine can evaluate them in any order and get the same violations.
//!
//! | Policy | Question |
//! |--------|----------|
//! | Completeness | Is the proposed content complete, without placeholders? |
//! | API validity | Does every referenced API actually exist? |
//! | Skepticism | Does the content repeat a known misconception? |
//! | Traceability | Are non-trivial design decisions documented? |
//! | Systemic impact | Does the change break existing callers? |
//! | Iteration discipline | Was the failure diagnosed before retrying? |

mod api_validity;
mod completeness;
mod iteration;
pub mod patterns;
mod skepticism;
mod systemic_impact;
mod traceability;

pub use api_validity::ApiValidityValidator;
pub use completeness::{lazy_density, CompletenessValidator};
pub use iteration::IterationDisciplineValidator;
pub use skepticism::{Misconception, SkepticismValidator};
pub use systemic_impact::{extract_signatures, SystemicImpactValidator};
pub use traceability::TraceabilityValidator;

use crate::types::{Action, ActionContext, PolicyId, Violation};

/// Common interface for all policy validators.
pub trait PolicyValidator: Send + Sync {
    /// Which policy this validator enforces.
    fn policy_id(&self) -> PolicyId;

    /// Evaluate a single (non-batch) action.
    ///
    /// # Arguments
    ///
    /// * `action` - The proposed action
    /// * `context` - Caller-supplied context for this submission
    ///
    /// # Returns
    ///
    /// Every violation found, in payload order. Empty when the action passes.
    fn evaluate(&self, action: &Action, context: &ActionContext) -> Vec<Violation>;

    /// The question this validator answers.
    fn question(&self) -> String {
        self.policy_id().question().to_string()
    }
}
