//! The three guardians of a coordination cycle.
//!
//! | Guardian | Phase | Input |
//! |----------|-------|-------|
//! | Pre | before execution | proposed action |
//! | Runtime | during execution | attempts, errors, reported violations |
//! | Post | after execution | produced result |

mod post;
mod pre;
mod runtime;

pub use post::{
    grade, PostDecision, PostGuardian, ACCEPTABLE_MAX_VIOLATIONS, ACCEPTABLE_MIN_SCORE,
    EXCELLENT_MAX_DENSITY, GOOD_MAX_VIOLATIONS, GOOD_MIN_SCORE,
};
pub use pre::{PreDecision, PreGuardian};
pub use runtime::RuntimeGuardian;
