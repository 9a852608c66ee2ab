//! Resilience patterns for guardian-runtime.
//!
//! This module provides:
//! - Per review-kind circuit breaker around the human channel
//! - Output byte budget for the execution phase

mod budget;
mod circuit_breaker;

pub use budget::ResourceBudget;
pub use circuit_breaker::{BreakerConfig, ChannelBreaker, CircuitState};
