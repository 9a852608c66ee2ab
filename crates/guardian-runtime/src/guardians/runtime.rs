//! Runtime guardian: supervision of the execution phase.
//!
//! The guardian owns the cycle's `IterationState`. The execution callback
//! never touches it directly; it reports through an `AttemptReporter`, and the
//! coordinator records attempts and failures here.
//!
//! Every trigger is latched. Once a condition holds it keeps holding until the
//! guardian is dropped, so `should_interrupt` never flaps back to `None`.
//!
//! | Trigger | Interrupt | Priority |
//! |---------|-----------|----------|
//! | attempt ceiling reached | MAX_ITERATIONS_EXCEEDED | 1 |
//! | CRITICAL violation reported | CRITICAL_VIOLATION | 2 |
//! | same error fingerprint twice | CIRCULAR_ERROR | 3 |
//! | wall-clock deadline passed | TIMEOUT | 4 |
//! | output budget exceeded | RESOURCE_LIMIT | 5 |

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use guardian_core::Violation;
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::clock::Clock;
use crate::decision::RuntimeInterrupt;
use crate::iteration::{ErrorFingerprint, IterationState};
use crate::resilience::ResourceBudget;

#[derive(Debug)]
struct Supervision {
    iteration: IterationState,
    max_exceeded: bool,
    critical: Option<Violation>,
    circular: Option<ErrorFingerprint>,
    timed_out: bool,
    resource: Option<(u64, u64)>,
    reported: Vec<Violation>,
    raised: Vec<RuntimeInterrupt>,
}

/// Supervises one cycle's execution.
pub struct RuntimeGuardian {
    state: Mutex<Supervision>,
    max_attempts: u32,
    budget: ResourceBudget,
    clock: Arc<dyn Clock>,
    interrupt_tx: watch::Sender<Option<RuntimeInterrupt>>,
    cancelled: AtomicBool,
}

impl RuntimeGuardian {
    /// Create a guardian for one action.
    ///
    /// # Arguments
    ///
    /// * `action_id` - Action being executed
    /// * `max_attempts` - Attempt ceiling (at least 1)
    /// * `execution_timeout` - Wall-clock budget from now
    /// * `max_output_bytes` - Optional output ceiling
    /// * `clock` - Time source for the deadline
    pub fn new(
        action_id: Uuid,
        max_attempts: u32,
        execution_timeout: Duration,
        max_output_bytes: Option<u64>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let started_at = clock.now();
        let deadline = chrono::Duration::from_std(execution_timeout)
            .ok()
            .and_then(|d| started_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let (interrupt_tx, _) = watch::channel(None);

        Self {
            state: Mutex::new(Supervision {
                iteration: IterationState::new(action_id, started_at, deadline),
                max_exceeded: false,
                critical: None,
                circular: None,
                timed_out: false,
                resource: None,
                reported: Vec::new(),
                raised: Vec::new(),
            }),
            max_attempts: max_attempts.max(1),
            budget: ResourceBudget::new(max_output_bytes),
            clock,
            interrupt_tx,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempt_count(&self) -> u32 {
        self.state.lock().iteration.attempt_count
    }

    /// Whether another attempt may start.
    ///
    /// Refusing an attempt latches MAX_ITERATIONS_EXCEEDED.
    pub fn admit_attempt(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.iteration.attempt_count < self.max_attempts && !state.max_exceeded {
                return true;
            }
            state.max_exceeded = true;
        }
        self.should_interrupt();
        false
    }

    /// Record a finished attempt, with its error when it failed.
    pub fn record_attempt(&self, error: Option<&str>) {
        {
            let mut state = self.state.lock();
            let repeated = state.iteration.record(error);
            tracing::debug!(
                action_id = %state.iteration.action_id,
                attempt = state.iteration.attempt_count,
                failed = error.is_some(),
                "Attempt recorded"
            );

            if state.iteration.attempt_count > self.max_attempts {
                state.max_exceeded = true;
            }
            if state.circular.is_none() {
                state.circular = repeated;
            }
        }
        self.should_interrupt();
    }

    /// Report a violation detected during execution.
    ///
    /// Returns true when the violation is CRITICAL.
    pub fn report_violation(&self, violation: Violation) -> bool {
        let critical = violation.is_critical();
        {
            let mut state = self.state.lock();
            if critical && state.critical.is_none() {
                state.critical = Some(violation.clone());
            }
            state.reported.push(violation);
        }
        if critical {
            self.should_interrupt();
        }
        critical
    }

    /// Report output produced during execution.
    ///
    /// Returns true once the output budget is exceeded.
    pub fn report_output_bytes(&self, bytes: u64) -> bool {
        if !self.budget.record(bytes) {
            return false;
        }
        {
            let mut state = self.state.lock();
            if state.resource.is_none() {
                let limit = self.budget.max_bytes.unwrap_or(u64::MAX);
                state.resource = Some((self.budget.used(), limit));
            }
        }
        self.should_interrupt();
        true
    }

    /// Latch an interrupt raised from outside, such as the deadline monitor.
    pub fn signal(&self, interrupt: RuntimeInterrupt) {
        {
            let mut state = self.state.lock();
            match interrupt {
                RuntimeInterrupt::MaxIterationsExceeded { .. } => state.max_exceeded = true,
                RuntimeInterrupt::CriticalViolation { violation } => {
                    if state.critical.is_none() {
                        state.critical = Some(violation);
                    }
                }
                RuntimeInterrupt::CircularError { fingerprint } => {
                    if state.circular.is_none() {
                        state.circular = Some(fingerprint);
                    }
                }
                RuntimeInterrupt::Timeout => state.timed_out = true,
                RuntimeInterrupt::ResourceLimit { used, limit } => {
                    if state.resource.is_none() {
                        state.resource = Some((used, limit));
                    }
                }
            }
        }
        self.should_interrupt();
    }

    /// The highest-priority interrupt condition that currently holds.
    pub fn should_interrupt(&self) -> Option<RuntimeInterrupt> {
        let now = self.clock.now();
        let interrupt = {
            let mut state = self.state.lock();
            if state.iteration.is_past_deadline(now) {
                state.timed_out = true;
            }

            let interrupt = if state.max_exceeded {
                Some(RuntimeInterrupt::MaxIterationsExceeded {
                    attempts: state.iteration.attempt_count,
                    max_attempts: self.max_attempts,
                })
            } else if let Some(violation) = &state.critical {
                Some(RuntimeInterrupt::CriticalViolation {
                    violation: violation.clone(),
                })
            } else if let Some(fingerprint) = &state.circular {
                Some(RuntimeInterrupt::CircularError {
                    fingerprint: fingerprint.clone(),
                })
            } else if state.timed_out {
                Some(RuntimeInterrupt::Timeout)
            } else {
                state
                    .resource
                    .map(|(used, limit)| RuntimeInterrupt::ResourceLimit { used, limit })
            };

            if let Some(raised) = &interrupt {
                let seen = state.raised.iter().any(|r| r.kind() == raised.kind());
                if !seen {
                    tracing::warn!(
                        action_id = %state.iteration.action_id,
                        interrupt = %raised,
                        "Runtime interrupt raised"
                    );
                    state.raised.push(raised.clone());
                }
            }
            interrupt
        };

        if let Some(raised) = &interrupt {
            self.interrupt_tx.send_if_modified(|current| {
                if current.as_ref() == Some(raised) {
                    false
                } else {
                    *current = Some(raised.clone());
                    true
                }
            });
        }
        interrupt
    }

    /// Wait until any interrupt is raised.
    pub async fn wait_for_interrupt(&self) -> RuntimeInterrupt {
        let mut rx = self.interrupt_tx.subscribe();
        loop {
            if let Some(interrupt) = rx.borrow_and_update().clone() {
                return interrupt;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// Ask the callback to stop. Cancellation is cooperative.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Distinct interrupts in the order they were first raised.
    pub fn interrupts(&self) -> Vec<RuntimeInterrupt> {
        self.state.lock().raised.clone()
    }

    /// Violations reported by the callback during execution.
    pub fn reported_violations(&self) -> Vec<Violation> {
        self.state.lock().reported.clone()
    }

    /// A copy of the iteration state.
    pub fn snapshot(&self) -> IterationState {
        self.state.lock().iteration.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use guardian_core::{PolicyId, Severity};
    use proptest::prelude::*;

    fn guardian(max_attempts: u32) -> (RuntimeGuardian, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let guardian = RuntimeGuardian::new(
            Uuid::new_v4(),
            max_attempts,
            Duration::from_secs(60),
            Some(1024),
            clock.clone(),
        );
        (guardian, clock)
    }

    fn critical() -> Violation {
        Violation::new(
            PolicyId::Skepticism,
            Severity::Critical,
            "unbounded_gets: gets() cannot bound its input",
        )
    }

    #[test]
    fn test_quiet_until_a_trigger_holds() {
        let (guardian, _) = guardian(2);
        assert!(guardian.admit_attempt());
        guardian.record_attempt(Some("connection refused"));
        assert_eq!(guardian.should_interrupt(), None);
    }

    #[test]
    fn test_circular_error_on_second_occurrence() {
        let (guardian, _) = guardian(3);
        guardian.record_attempt(Some("File not found: /tmp/a.txt"));
        assert_eq!(guardian.should_interrupt(), None);

        guardian.record_attempt(Some("File not found: /tmp/b.txt"));
        let interrupt = guardian.should_interrupt();
        assert!(matches!(
            interrupt,
            Some(RuntimeInterrupt::CircularError { .. })
        ));
    }

    #[test]
    fn test_admit_refuses_past_ceiling() {
        let (guardian, _) = guardian(2);
        assert!(guardian.admit_attempt());
        guardian.record_attempt(Some("first"));
        assert!(guardian.admit_attempt());
        guardian.record_attempt(Some("second"));

        assert!(!guardian.admit_attempt());
        assert_eq!(
            guardian.should_interrupt(),
            Some(RuntimeInterrupt::MaxIterationsExceeded {
                attempts: 2,
                max_attempts: 2
            })
        );
    }

    #[test]
    fn test_recording_past_ceiling_latches() {
        let (guardian, _) = guardian(1);
        guardian.record_attempt(Some("one"));
        assert_eq!(guardian.should_interrupt(), None);
        guardian.record_attempt(Some("two"));
        assert!(matches!(
            guardian.should_interrupt(),
            Some(RuntimeInterrupt::MaxIterationsExceeded { .. })
        ));
    }

    #[test]
    fn test_critical_outranks_circular() {
        let (guardian, _) = guardian(5);
        guardian.record_attempt(Some("boom"));
        guardian.record_attempt(Some("boom"));
        assert!(guardian.report_violation(critical()));

        assert!(matches!(
            guardian.should_interrupt(),
            Some(RuntimeInterrupt::CriticalViolation { .. })
        ));
        let kinds: Vec<_> = guardian.interrupts().iter().map(|i| i.kind()).collect();
        assert_eq!(kinds, vec!["CIRCULAR_ERROR", "CRITICAL_VIOLATION"]);
    }

    #[test]
    fn test_non_critical_violation_does_not_interrupt() {
        let (guardian, _) = guardian(2);
        let medium = Violation::new(PolicyId::Traceability, Severity::Medium, "note");
        assert!(!guardian.report_violation(medium));
        assert_eq!(guardian.should_interrupt(), None);
        assert_eq!(guardian.reported_violations().len(), 1);
    }

    #[test]
    fn test_deadline_from_clock() {
        let (guardian, clock) = guardian(2);
        clock.advance(Duration::from_secs(59));
        assert_eq!(guardian.should_interrupt(), None);

        clock.advance(Duration::from_secs(1));
        assert_eq!(guardian.should_interrupt(), Some(RuntimeInterrupt::Timeout));
    }

    #[test]
    fn test_resource_limit() {
        let (guardian, _) = guardian(2);
        assert!(!guardian.report_output_bytes(1000));
        assert!(guardian.report_output_bytes(100));
        assert_eq!(
            guardian.should_interrupt(),
            Some(RuntimeInterrupt::ResourceLimit {
                used: 1100,
                limit: 1024
            })
        );
    }

    #[tokio::test]
    async fn test_wait_for_interrupt_wakes_on_signal() {
        let (guardian, _) = guardian(2);
        let guardian = Arc::new(guardian);

        let waiter = {
            let guardian = guardian.clone();
            tokio::spawn(async move { guardian.wait_for_interrupt().await })
        };
        tokio::task::yield_now().await;
        guardian.signal(RuntimeInterrupt::Timeout);

        assert_eq!(waiter.await.unwrap(), RuntimeInterrupt::Timeout);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Attempt(Option<u8>),
        Admit,
        Critical,
        Output(u16),
    }

    fn arb_step() -> impl Strategy<Value = Step> {
        prop_oneof![
            prop::option::of(0u8..4).prop_map(Step::Attempt),
            Just(Step::Admit),
            Just(Step::Critical),
            (0u16..600).prop_map(Step::Output),
        ]
    }

    proptest! {
        #[test]
        fn prop_interrupts_never_flap(max_attempts in 1u32..4, steps in prop::collection::vec(arb_step(), 1..24)) {
            let (guardian, _) = guardian(max_attempts);
            let mut seen_any = false;
            let mut seen_max = false;

            for step in steps {
                match step {
                    Step::Attempt(error) => {
                        let message = error.map(|e| format!("failure kind {}", ["a", "b", "c", "d"][e as usize]));
                        guardian.record_attempt(message.as_deref());
                    }
                    Step::Admit => {
                        guardian.admit_attempt();
                    }
                    Step::Critical => {
                        guardian.report_violation(critical());
                    }
                    Step::Output(bytes) => {
                        guardian.report_output_bytes(bytes as u64);
                    }
                }

                let interrupt = guardian.should_interrupt();
                if seen_any {
                    prop_assert!(interrupt.is_some());
                }
                if seen_max {
                    prop_assert!(
                        matches!(interrupt, Some(RuntimeInterrupt::MaxIterationsExceeded { .. })),
                        "expected MAX_ITERATIONS_EXCEEDED to hold"
                    );
                }
                seen_any |= interrupt.is_some();
                seen_max |= matches!(interrupt, Some(RuntimeInterrupt::MaxIterationsExceeded { .. }));
            }
        }
    }
}
