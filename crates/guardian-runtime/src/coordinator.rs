//! Guardian coordinator: one full cycle per action.
//!
//! # Execution Flow
//! 1. Validate the action and lock its targets
//! 2. Pre-guardian decides; escalations and warning confirmations go to the human channel
//! 3. Execute under runtime supervision (deadline monitor + interrupt race)
//! 4. Post-guardian grades the produced result
//! 5. Return a terminal `CycleReport`
//!
//! A rejected action never reaches the execution callback.

use std::sync::Arc;
use std::time::Duration;

use guardian_core::{
    Action, ActionContext, ComplianceEngine, EnforcementMode, PolicyValidator, RiskClassifier,
};

use crate::channel::{self, HumanChannel, ReviewKind, ReviewRequest};
use crate::clock::{Clock, SystemClock};
use crate::config::RuntimeConfig;
use crate::decision::{EscalationResolution, GuardianDecision, RuntimeInterrupt};
use crate::execution::{AttemptReporter, ExecutionCallback, ExecutionOutput};
use crate::guardians::{PostGuardian, PreGuardian, RuntimeGuardian};
use crate::locks::TargetLocks;
use crate::report::{CycleReport, CycleStatus, Phase, PhaseReport};
use crate::resilience::ChannelBreaker;
use crate::RuntimeError;

/// Error recorded for an attempt whose callback outlived the cancel grace.
const ABANDONED: &str = "abandoned after cancellation";

/// Builder for a `GuardianCoordinator`.
pub struct CoordinatorBuilder {
    config: RuntimeConfig,
    channel: Option<Arc<dyn HumanChannel>>,
    clock: Option<Arc<dyn Clock>>,
    validators: Vec<Box<dyn PolicyValidator>>,
}

impl CoordinatorBuilder {
    /// Route escalations and confirmations to a human channel.
    pub fn channel(mut self, channel: Arc<dyn HumanChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Append a custom validator after the standard set.
    pub fn validator(mut self, validator: Box<dyn PolicyValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn build(self) -> Result<GuardianCoordinator, RuntimeError> {
        self.config.validate()?;

        let mut engine = ComplianceEngine::new(&self.config.policy)?;
        for validator in self.validators {
            engine = engine.with_validator(validator);
        }
        let engine = Arc::new(engine);
        let classifier = RiskClassifier::new(&self.config.policy)?;

        Ok(GuardianCoordinator {
            pre: PreGuardian::new(classifier, engine.clone()),
            post: PostGuardian::new(engine, self.config.policy.max_attempts),
            breaker: ChannelBreaker::new(self.config.channel_breaker.clone()),
            channel: self.channel,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            locks: TargetLocks::new(),
            config: self.config,
        })
    }
}

enum Execution {
    Succeeded(ExecutionOutput),
    Interrupted,
}

/// Runs Pre → Runtime → Post for each action.
pub struct GuardianCoordinator {
    config: RuntimeConfig,
    pre: PreGuardian,
    post: PostGuardian,
    channel: Option<Arc<dyn HumanChannel>>,
    breaker: ChannelBreaker,
    clock: Arc<dyn Clock>,
    locks: TargetLocks,
}

impl GuardianCoordinator {
    pub fn builder(config: RuntimeConfig) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            channel: None,
            clock: None,
            validators: Vec::new(),
        }
    }

    /// A coordinator with no human channel and the system clock.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Ask the human channel, failing closed. Without a channel the answer is a timeout.
    pub async fn review(&self, request: &ReviewRequest, timeout: Duration) -> EscalationResolution {
        match &self.channel {
            Some(human) => channel::review(human.as_ref(), &self.breaker, request, timeout).await,
            None => EscalationResolution::TimedOut,
        }
    }

    /// Run one full guarded cycle.
    ///
    /// # Arguments
    ///
    /// * `action` - The proposed action
    /// * `context` - Caller-supplied context
    /// * `mode` - Enforcement mode for both compliance passes
    /// * `callback` - Performs the action once approved
    ///
    /// # Returns
    ///
    /// A terminal report, or an error when the action is malformed. A
    /// malformed action never reaches a decision.
    pub async fn run_cycle(
        &self,
        action: &Action,
        context: &ActionContext,
        mode: EnforcementMode,
        callback: &dyn ExecutionCallback,
    ) -> Result<CycleReport, RuntimeError> {
        action.validate()?;
        let _guards = self
            .locks
            .lock_all(action.leaves().iter().map(|a| a.target.as_str()))
            .await;

        let mut report = CycleReport::new(action.id, &action.target, self.clock.now());
        tracing::info!(action_id = %action.id, path = %action.target, mode = %mode, "Cycle started");

        let pre = self.pre.decide(
            action,
            context,
            mode,
            self.has_channel(),
            self.config.escalation_timeout,
        )?;
        report.risk = Some(pre.risk.clone());
        report.pre_decision = Some(pre.decision.clone());
        report.compliance_reports.push(PhaseReport {
            phase: Phase::Pre,
            compliance: pre.compliance,
        });

        match &pre.decision {
            GuardianDecision::Reject { reason } => {
                tracing::warn!(action_id = %action.id, reason = %reason, "Pre-guardian rejected action");
                return Ok(self.finish(report, CycleStatus::Rejected));
            }
            GuardianDecision::Escalate { reason, timeout } => {
                let request = review_request(action, ReviewKind::Escalation, reason);
                let resolution = self.review(&request, *timeout).await;
                report.escalation = Some(resolution.clone());
                if !resolution.is_approved() {
                    tracing::warn!(action_id = %action.id, resolution = %resolution, "Escalation not approved");
                    return Ok(self.finish(report, CycleStatus::Rejected));
                }
            }
            GuardianDecision::ApproveWithWarning { warnings } => {
                if context.skip_confirmation {
                    report.warnings_acknowledged = true;
                } else if self.config.confirm_warnings && self.has_channel() {
                    let request =
                        review_request(action, ReviewKind::Confirmation, &warnings.join("; "));
                    let resolution = self.review(&request, self.config.escalation_timeout).await;
                    report.escalation = Some(resolution.clone());
                    if !resolution.is_approved() {
                        tracing::warn!(action_id = %action.id, resolution = %resolution, "Warning confirmation not approved");
                        return Ok(self.finish(report, CycleStatus::Rejected));
                    }
                    report.warnings_acknowledged = true;
                }
            }
            GuardianDecision::Approve => {}
        }

        let guardian = Arc::new(RuntimeGuardian::new(
            action.id,
            self.config.policy.max_attempts,
            self.config.execution_timeout,
            self.config.max_output_bytes,
            self.clock.clone(),
        ));
        let execution = self.supervise(action, &guardian, callback, &mut report).await;
        report.attempts = guardian.attempt_count();
        report.interrupts = guardian.interrupts();

        let output = match execution {
            Execution::Succeeded(output) => output,
            Execution::Interrupted => return Ok(self.finish(report, CycleStatus::Interrupted)),
        };

        let produced = action.produced(output.content.as_str());
        let post = self.post.decide(&produced, context, mode, report.attempts)?;
        let status = if post.decision.is_approval() {
            CycleStatus::Completed
        } else {
            tracing::warn!(action_id = %action.id, quality = %post.quality, "Post-guardian rejected result");
            CycleStatus::Rejected
        };

        report.post_decision = Some(post.decision);
        report.quality = Some(post.quality);
        report.compliance_reports.push(PhaseReport {
            phase: Phase::Post,
            compliance: post.compliance,
        });
        report.output = Some(output);
        Ok(self.finish(report, status))
    }

    /// Run the callback once with no guardians engaged.
    pub async fn run_unguarded(
        &self,
        action: &Action,
        callback: &dyn ExecutionCallback,
    ) -> Result<CycleReport, RuntimeError> {
        action.validate()?;
        let _guards = self
            .locks
            .lock_all(action.leaves().iter().map(|a| a.target.as_str()))
            .await;

        tracing::warn!(action_id = %action.id, path = %action.target, "Protection not engaged, running unguarded");
        let mut report = CycleReport::new(action.id, &action.target, self.clock.now());
        let guardian = Arc::new(RuntimeGuardian::new(
            action.id,
            1,
            self.config.execution_timeout,
            None,
            self.clock.clone(),
        ));
        let reporter = AttemptReporter::new(guardian.clone());

        match callback.execute(action, &reporter, 1).await {
            Ok(output) => {
                guardian.record_attempt(None);
                report.output = Some(output);
            }
            Err(failure) => {
                guardian.record_attempt(Some(&failure.message));
                report.error = Some(failure.message);
            }
        }
        report.attempts = guardian.attempt_count();
        Ok(self.finish(report, CycleStatus::Bypassed))
    }

    async fn supervise(
        &self,
        action: &Action,
        guardian: &Arc<RuntimeGuardian>,
        callback: &dyn ExecutionCallback,
        report: &mut CycleReport,
    ) -> Execution {
        let monitor = {
            let guardian = guardian.clone();
            let timeout = self.config.execution_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                guardian.signal(RuntimeInterrupt::Timeout);
            })
        };

        let execution = self.attempt_loop(action, guardian, callback, report).await;
        monitor.abort();
        execution
    }

    async fn attempt_loop(
        &self,
        action: &Action,
        guardian: &Arc<RuntimeGuardian>,
        callback: &dyn ExecutionCallback,
        report: &mut CycleReport,
    ) -> Execution {
        let reporter = AttemptReporter::new(guardian.clone());

        loop {
            if guardian.should_interrupt().is_some() || !guardian.admit_attempt() {
                return Execution::Interrupted;
            }

            let attempt = guardian.attempt_count() + 1;
            tracing::debug!(action_id = %report.action_id, attempt, "Attempt started");
            let mut run = callback.execute(action, &reporter, attempt);

            let finished = tokio::select! {
                biased;
                result = &mut run => Some(result),
                _ = guardian.wait_for_interrupt() => None,
            };

            match finished {
                Some(Ok(output)) => {
                    guardian.record_attempt(None);
                    report.error = None;
                    if guardian.should_interrupt().is_some() {
                        return Execution::Interrupted;
                    }
                    return Execution::Succeeded(output);
                }
                Some(Err(failure)) => {
                    tracing::debug!(action_id = %report.action_id, attempt, error = %failure, "Attempt failed");
                    guardian.record_attempt(Some(&failure.message));
                    report.error = Some(failure.message);
                }
                None => {
                    guardian.cancel();
                    match tokio::time::timeout(self.config.cancel_grace, &mut run).await {
                        Ok(Ok(_)) => guardian.record_attempt(None),
                        Ok(Err(failure)) => {
                            guardian.record_attempt(Some(&failure.message));
                            report.error = Some(failure.message);
                        }
                        Err(_) => {
                            tracing::warn!(
                                action_id = %report.action_id,
                                grace = %humantime::format_duration(self.config.cancel_grace),
                                "Callback ignored cancellation, abandoning attempt"
                            );
                            guardian.record_attempt(Some(ABANDONED));
                            report.error = Some(ABANDONED.to_string());
                        }
                    }
                    return Execution::Interrupted;
                }
            }
        }
    }

    fn finish(&self, mut report: CycleReport, status: CycleStatus) -> CycleReport {
        report.status = status;
        report.finished_at = self.clock.now();
        tracing::info!(
            action_id = %report.action_id,
            path = %report.target,
            status = %report.status,
            attempts = report.attempts,
            "Cycle finished"
        );
        report
    }
}

fn review_request(action: &Action, kind: ReviewKind, reason: &str) -> ReviewRequest {
    ReviewRequest {
        action_id: action.id,
        target: action.target.clone(),
        kind,
        reason: reason.to_string(),
        payload: action.payload.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelError, ChannelResponse};
    use crate::execution::ExecutionFailure;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns a fixed sequence of outcomes, one per attempt.
    struct Scripted {
        outcomes: Vec<Result<String, String>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<&str, &str>>) -> Self {
            Self {
                outcomes: outcomes
                    .into_iter()
                    .map(|o| o.map(str::to_string).map_err(str::to_string))
                    .collect(),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExecutionCallback for Scripted {
        async fn execute(
            &self,
            _action: &Action,
            _reporter: &AttemptReporter,
            attempt: u32,
        ) -> Result<ExecutionOutput, ExecutionFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcomes[(attempt as usize - 1).min(self.outcomes.len() - 1)] {
                Ok(content) => Ok(ExecutionOutput::new(content.clone())),
                Err(message) => Err(ExecutionFailure::new(message.clone())),
            }
        }
    }

    struct Approving;

    #[async_trait]
    impl HumanChannel for Approving {
        async fn request(
            &self,
            _request: &ReviewRequest,
            _timeout: Duration,
        ) -> Result<ChannelResponse, ChannelError> {
            Ok(ChannelResponse::Approve)
        }
    }

    fn coordinator() -> GuardianCoordinator {
        GuardianCoordinator::new(RuntimeConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_low_risk_create_completes() {
        let callback = Scripted::new(vec![Ok("pub fn one() -> u32 {\n    1\n}\n")]);
        let report = coordinator()
            .run_cycle(
                &Action::create("/project/src/one.rs", "pub fn one() -> u32 {\n    1\n}\n"),
                &ActionContext::new(),
                EnforcementMode::Strict,
                &callback,
            )
            .await
            .unwrap();

        assert_eq!(report.status, CycleStatus::Completed);
        assert_eq!(report.pre_decision, Some(GuardianDecision::Approve));
        assert_eq!(report.attempts, 1);
        assert_eq!(callback.calls(), 1);
        assert!(report.compliance(Phase::Post).is_some());
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let callback = Scripted::new(vec![Err("connection refused"), Ok("done\n")]);
        let report = coordinator()
            .run_cycle(
                &Action::create("/project/notes.md", "done\n"),
                &ActionContext::new(),
                EnforcementMode::Strict,
                &callback,
            )
            .await
            .unwrap();

        assert_eq!(report.status, CycleStatus::Completed);
        assert_eq!(report.attempts, 2);
        assert!(report.interrupts.is_empty());
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_max_iterations_interrupts() {
        let callback = Scripted::new(vec![Err("first failure"), Err("second, unrelated failure")]);
        let report = coordinator()
            .run_cycle(
                &Action::create("/project/notes.md", "x\n"),
                &ActionContext::new(),
                EnforcementMode::Strict,
                &callback,
            )
            .await
            .unwrap();

        assert_eq!(report.status, CycleStatus::Interrupted);
        assert_eq!(callback.calls(), 2);
        assert!(matches!(
            report.interrupts.last(),
            Some(RuntimeInterrupt::MaxIterationsExceeded { attempts: 2, max_attempts: 2 })
        ));
        assert!(report.post_decision.is_none());
    }

    #[tokio::test]
    async fn test_escalation_approved_runs() {
        let coordinator = GuardianCoordinator::builder(RuntimeConfig::default())
            .channel(Arc::new(Approving))
            .build()
            .unwrap();
        let callback = Scripted::new(vec![Ok("")]);

        let report = coordinator
            .run_cycle(
                &Action::delete("/project/.env"),
                &ActionContext::new(),
                EnforcementMode::Strict,
                &callback,
            )
            .await
            .unwrap();

        assert_eq!(report.escalation, Some(EscalationResolution::Approved));
        assert_eq!(callback.calls(), 1);
        assert_eq!(report.status, CycleStatus::Completed);
    }

    #[tokio::test]
    async fn test_malformed_action_is_an_error() {
        let callback = Scripted::new(vec![Ok("")]);
        let result = coordinator()
            .run_cycle(
                &Action::batch(Vec::new()),
                &ActionContext::new(),
                EnforcementMode::Strict,
                &callback,
            )
            .await;

        assert!(matches!(result, Err(RuntimeError::Engine(_))));
        assert_eq!(callback.calls(), 0);
    }

    #[tokio::test]
    async fn test_unguarded_runs_once() {
        let callback = Scripted::new(vec![Err("boom")]);
        let report = coordinator()
            .run_unguarded(&Action::delete("/project/.env"), &callback)
            .await
            .unwrap();

        assert_eq!(report.status, CycleStatus::Bypassed);
        assert_eq!(report.error.as_deref(), Some("boom"));
        assert!(report.pre_decision.is_none());
    }
}
