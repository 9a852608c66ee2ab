//! Per review-kind circuit around the human channel.
//!
//! A channel that keeps erroring is skipped for `recovery_timeout`; reviews of
//! that kind fail closed without contacting it. The first review after the
//! pause is a trial whose outcome closes or reopens the circuit.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::channel::ReviewKind;
use crate::config::duration_human;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerConfig {
    /// Consecutive channel errors that open a circuit
    pub failure_threshold: u32,
    #[serde(with = "duration_human")]
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed { failures: u32 },
    Open { until: Instant },
    Trial,
}

pub struct ChannelBreaker {
    circuits: Mutex<HashMap<ReviewKind, CircuitState>>,
    config: BreakerConfig,
}

impl ChannelBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Whether a review of `kind` may reach the channel. An open circuit
    /// whose pause has elapsed lets reviews through on trial.
    pub fn admits(&self, kind: ReviewKind) -> bool {
        let mut circuits = self.circuits.lock();
        match circuits.get(&kind) {
            Some(CircuitState::Open { until }) if Instant::now() < *until => false,
            Some(CircuitState::Open { .. }) => {
                circuits.insert(kind, CircuitState::Trial);
                tracing::info!(kind = %kind, "Trying the human channel again");
                true
            }
            _ => true,
        }
    }

    /// Record whether the channel answered a review of `kind`.
    pub fn record(&self, kind: ReviewKind, answered: bool) {
        let mut circuits = self.circuits.lock();
        let current = circuits
            .get(&kind)
            .copied()
            .unwrap_or(CircuitState::Closed { failures: 0 });
        let next = match (current, answered) {
            (_, true) => CircuitState::Closed { failures: 0 },
            (CircuitState::Open { until }, false) => CircuitState::Open { until },
            (CircuitState::Trial, false) => self.open(kind, 1),
            (CircuitState::Closed { failures }, false) => {
                if failures + 1 >= self.config.failure_threshold {
                    self.open(kind, failures + 1)
                } else {
                    CircuitState::Closed {
                        failures: failures + 1,
                    }
                }
            }
        };
        circuits.insert(kind, next);
    }

    pub fn state(&self, kind: ReviewKind) -> CircuitState {
        self.circuits
            .lock()
            .get(&kind)
            .copied()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    fn open(&self, kind: ReviewKind, failures: u32) -> CircuitState {
        tracing::warn!(
            kind = %kind,
            failures,
            pause = %humantime::format_duration(self.config.recovery_timeout),
            "Human channel circuit opened"
        );
        CircuitState::Open {
            until: Instant::now() + self.config.recovery_timeout,
        }
    }
}

impl Default for ChannelBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32) -> ChannelBreaker {
        ChannelBreaker::new(BreakerConfig {
            failure_threshold,
            recovery_timeout: Duration::from_secs(30),
        })
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let breaker = breaker(3);
        assert!(breaker.admits(ReviewKind::Escalation));

        breaker.record(ReviewKind::Escalation, false);
        breaker.record(ReviewKind::Escalation, false);
        assert!(breaker.admits(ReviewKind::Escalation));

        breaker.record(ReviewKind::Escalation, false);
        assert!(!breaker.admits(ReviewKind::Escalation));
        assert!(breaker.admits(ReviewKind::Confirmation));
    }

    #[test]
    fn test_answer_resets_failures() {
        let breaker = breaker(3);
        breaker.record(ReviewKind::Confirmation, false);
        breaker.record(ReviewKind::Confirmation, false);
        breaker.record(ReviewKind::Confirmation, true);
        breaker.record(ReviewKind::Confirmation, false);

        assert_eq!(
            breaker.state(ReviewKind::Confirmation),
            CircuitState::Closed { failures: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_closes_or_reopens() {
        let breaker = breaker(1);
        breaker.record(ReviewKind::SuggestedFix, false);
        assert!(!breaker.admits(ReviewKind::SuggestedFix));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breaker.admits(ReviewKind::SuggestedFix));
        assert_eq!(breaker.state(ReviewKind::SuggestedFix), CircuitState::Trial);

        breaker.record(ReviewKind::SuggestedFix, false);
        assert!(!breaker.admits(ReviewKind::SuggestedFix));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breaker.admits(ReviewKind::SuggestedFix));
        breaker.record(ReviewKind::SuggestedFix, true);
        assert_eq!(
            breaker.state(ReviewKind::SuggestedFix),
            CircuitState::Closed { failures: 0 }
        );
    }
}
