//! The auto-protection service.
//!
//! A worker task takes submissions from a bounded queue and runs each one as
//! its own task, so cycles on different targets proceed in parallel while the
//! coordinator's target locks keep same-target cycles in order.
//!
//! # Correction
//! A rejected submission may be corrected at most once:
//! 1. `propose` must find a fix in the catalog
//! 2. the rejection fingerprint must differ from the last one auto-fixed for that target
//! 3. SUGGEST_AND_WAIT additionally needs reviewer approval within the escalation timeout
//!
//! The corrected copy is resubmitted once and its report becomes the outcome.

use std::collections::VecDeque;
use std::sync::Arc;

use guardian_core::{Action, ActionContext, EnforcementMode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

use super::audit::{AuditLog, AuditSink, CorrectionRecord, EventStatus, ProtectionEvent};
use super::correction::propose;
use super::{CorrectionStrategy, ProtectionMode};
use crate::channel::{ReviewKind, ReviewRequest};
use crate::coordinator::GuardianCoordinator;
use crate::execution::ExecutionCallback;
use crate::iteration::{normalize_error, ErrorFingerprint};
use crate::report::{CycleReport, CycleStatus};
use crate::RuntimeError;

/// Final report of a submission and the corrections applied on the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionOutcome {
    pub report: CycleReport,
    pub corrections: Vec<CorrectionRecord>,
}

impl ProtectionOutcome {
    fn uncorrected(report: CycleReport) -> Self {
        Self {
            report,
            corrections: Vec::new(),
        }
    }
}

struct Submission {
    action: Action,
    context: ActionContext,
    mode: EnforcementMode,
    callback: Arc<dyn ExecutionCallback>,
    reply: oneshot::Sender<Result<ProtectionOutcome, RuntimeError>>,
}

/// Targets remembered as already auto-corrected.
const MAX_REMEMBERED_FIXES: usize = 256;

/// Last corrected failure per target, oldest target evicted first.
struct FixMemory {
    entries: VecDeque<(String, ErrorFingerprint)>,
    capacity: usize,
}

impl FixMemory {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, target: &str) -> Option<&ErrorFingerprint> {
        self.entries
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, fingerprint)| fingerprint)
    }

    fn remember(&mut self, target: String, fingerprint: ErrorFingerprint) {
        self.forget(&target);
        self.entries.push_back((target, fingerprint));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    fn forget(&mut self, target: &str) {
        self.entries.retain(|(t, _)| t != target);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct Inner {
    coordinator: Arc<GuardianCoordinator>,
    audit: Arc<AuditLog>,
    sinks: Vec<Arc<dyn AuditSink>>,
    last_fix: Mutex<FixMemory>,
}

/// Long-lived protection loop with a start/stop lifecycle.
pub struct ProtectionService {
    sender: mpsc::Sender<Submission>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    audit: Arc<AuditLog>,
}

impl ProtectionService {
    /// Spawn the worker. Must be called within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `coordinator` - Runs the cycles; its config supplies mode and strategy
    /// * `sinks` - Extra audit destinations, in addition to the in-memory log
    pub fn start(coordinator: Arc<GuardianCoordinator>, sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        let config = coordinator.config();
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let audit = Arc::new(AuditLog::new(config.audit_retention));

        tracing::info!(
            protection_mode = %config.protection_mode,
            correction_strategy = %config.correction_strategy,
            "Protection service started"
        );

        let inner = Arc::new(Inner {
            coordinator,
            audit: audit.clone(),
            sinks,
            last_fix: Mutex::new(FixMemory::new(MAX_REMEMBERED_FIXES)),
        });
        let worker = tokio::spawn(run(inner, receiver, shutdown_rx));

        Self {
            sender,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
            audit,
        }
    }

    /// The in-memory audit log.
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown_tx.borrow() && !self.sender.is_closed()
    }

    /// Submit an action and wait for its outcome.
    pub async fn submit(
        &self,
        action: Action,
        context: ActionContext,
        mode: EnforcementMode,
        callback: Arc<dyn ExecutionCallback>,
    ) -> Result<ProtectionOutcome, RuntimeError> {
        if *self.shutdown_tx.borrow() {
            return Err(RuntimeError::ShuttingDown);
        }

        let (reply, response) = oneshot::channel();
        self.sender
            .send(Submission {
                action,
                context,
                mode,
                callback,
                reply,
            })
            .await
            .map_err(|_| RuntimeError::ServiceStopped)?;

        response.await.map_err(|_| RuntimeError::ServiceStopped)?
    }

    /// Stop intake, answer queued submissions with `ShuttingDown` and wait
    /// for in-flight cycles to finish.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Protection worker ended abnormally");
            }
        }
        tracing::info!("Protection service stopped");
    }
}

async fn run(
    inner: Arc<Inner>,
    mut receiver: mpsc::Receiver<Submission>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            Some(submission) = receiver.recv() => {
                let inner = inner.clone();
                in_flight.spawn(async move {
                    let outcome = inner
                        .handle(
                            submission.action,
                            submission.context,
                            submission.mode,
                            submission.callback,
                        )
                        .await;
                    // The submitter may have gone away
                    let _ = submission.reply.send(outcome);
                });
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            else => break,
        }
    }

    receiver.close();
    let mut refused = 0usize;
    while let Ok(submission) = receiver.try_recv() {
        let _ = submission.reply.send(Err(RuntimeError::ShuttingDown));
        refused += 1;
    }
    tracing::info!(
        in_flight = in_flight.len(),
        refused,
        "Protection service draining"
    );

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::warn!(error = %e, "In-flight cycle ended abnormally");
        }
    }
}

impl Inner {
    fn guards(&self, context: &ActionContext) -> bool {
        match self.coordinator.config().protection_mode {
            ProtectionMode::AlwaysOn => true,
            ProtectionMode::OnDemand => context.protection_requested,
            ProtectionMode::Disabled => false,
        }
    }

    fn record(&self, event: ProtectionEvent) {
        if let Err(e) = self.audit.append(&event) {
            tracing::warn!(error = %e, "Audit log append failed");
        }
        for sink in &self.sinks {
            if let Err(e) = sink.append(&event) {
                tracing::warn!(action_id = %event.action_id, error = %e, "Audit sink append failed");
            }
        }
    }

    async fn handle(
        &self,
        action: Action,
        context: ActionContext,
        mode: EnforcementMode,
        callback: Arc<dyn ExecutionCallback>,
    ) -> Result<ProtectionOutcome, RuntimeError> {
        if !self.guards(&context) {
            let report = self
                .coordinator
                .run_unguarded(&action, callback.as_ref())
                .await?;
            self.record(ProtectionEvent::from_report(&report));
            return Ok(ProtectionOutcome::uncorrected(report));
        }

        let report = self
            .coordinator
            .run_cycle(&action, &context, mode, callback.as_ref())
            .await?;
        self.record(ProtectionEvent::from_report(&report));

        match report.status {
            CycleStatus::Completed => {
                self.last_fix.lock().forget(&action.target);
                return Ok(ProtectionOutcome::uncorrected(report));
            }
            CycleStatus::Rejected => {}
            _ => return Ok(ProtectionOutcome::uncorrected(report)),
        }

        let strategy = self.coordinator.config().correction_strategy;
        if strategy == CorrectionStrategy::RejectOnly {
            return Ok(ProtectionOutcome::uncorrected(report));
        }
        let Some(fix) = propose(&action) else {
            return Ok(ProtectionOutcome::uncorrected(report));
        };

        let fingerprint = normalize_error(&report.rejection_reason().unwrap_or_default());
        if self.last_fix.lock().get(&action.target) == Some(&fingerprint) {
            tracing::info!(
                action_id = %action.id,
                path = %action.target,
                "Same failure was already corrected once, not correcting again"
            );
            return Ok(ProtectionOutcome::uncorrected(report));
        }

        let corrected = action.corrected(fix.payload.as_str());
        let fixes: Vec<String> = fix.fixes.iter().map(|f| f.to_string()).collect();

        let approved_by = if strategy == CorrectionStrategy::SuggestAndWait {
            let request = ReviewRequest {
                action_id: action.id,
                target: action.target.clone(),
                kind: ReviewKind::SuggestedFix,
                reason: format!("suggested fix ({})", fixes.join(", ")),
                payload: fix.payload.clone(),
            };
            let timeout = self.coordinator.config().escalation_timeout;
            let resolution = self.coordinator.review(&request, timeout).await;
            if !resolution.is_approved() {
                self.record(ProtectionEvent {
                    timestamp: self.coordinator.clock().now(),
                    action_id: action.id,
                    target: action.target.clone(),
                    status: EventStatus::SuggestionDeclined,
                    decision: None,
                    reason: Some(format!("suggested fix {}", resolution)),
                    correction_applied: None,
                });
                return Ok(ProtectionOutcome::uncorrected(report));
            }
            "reviewer"
        } else {
            "auto"
        };

        self.last_fix
            .lock()
            .remember(action.target.clone(), fingerprint);

        let record = CorrectionRecord {
            fixes: fix.fixes,
            original_action: action,
            corrected_action: corrected.clone(),
            approved_by: approved_by.to_string(),
        };
        tracing::info!(
            action_id = %record.original_action.id,
            corrected_id = %corrected.id,
            fixes = %fixes.join(", "),
            "Resubmitting corrected action"
        );
        self.record(ProtectionEvent::corrected(
            self.coordinator.clock().now(),
            record.clone(),
        ));

        let report = self
            .coordinator
            .run_cycle(&corrected, &context, mode, callback.as_ref())
            .await?;
        self.record(ProtectionEvent::from_report(&report));

        Ok(ProtectionOutcome {
            report,
            corrections: vec![record],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::execution::{AttemptReporter, ExecutionFailure, ExecutionOutput};
    use async_trait::async_trait;

    /// Produces the approved action's payload.
    struct Echo;

    #[async_trait]
    impl ExecutionCallback for Echo {
        async fn execute(
            &self,
            action: &Action,
            _reporter: &AttemptReporter,
            _attempt: u32,
        ) -> Result<ExecutionOutput, ExecutionFailure> {
            Ok(ExecutionOutput::new(action.payload.clone()))
        }
    }

    fn service(config: RuntimeConfig) -> ProtectionService {
        let coordinator = Arc::new(GuardianCoordinator::new(config).unwrap());
        ProtectionService::start(coordinator, Vec::new())
    }

    #[tokio::test]
    async fn test_on_demand_bypasses_unrequested() {
        let service = service(RuntimeConfig {
            protection_mode: ProtectionMode::OnDemand,
            ..RuntimeConfig::default()
        });

        let outcome = service
            .submit(
                Action::delete("/project/.env"),
                ActionContext::new(),
                EnforcementMode::Strict,
                Arc::new(Echo),
            )
            .await
            .unwrap();
        assert_eq!(outcome.report.status, CycleStatus::Bypassed);

        let mut context = ActionContext::new();
        context.protection_requested = true;
        let outcome = service
            .submit(
                Action::delete("/project/.env"),
                context,
                EnforcementMode::Strict,
                Arc::new(Echo),
            )
            .await
            .unwrap();
        assert_eq!(outcome.report.status, CycleStatus::Rejected);

        let statuses: Vec<_> = service.audit().events().iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![EventStatus::Bypassed, EventStatus::Rejected]);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_reject_only_never_corrects() {
        let service = service(RuntimeConfig::default());
        let outcome = service
            .submit(
                Action::create("/project/src/main.rs", "fn main() {\n    todo!();\n}\n"),
                ActionContext::new(),
                EnforcementMode::Strict,
                Arc::new(Echo),
            )
            .await
            .unwrap();

        assert_eq!(outcome.report.status, CycleStatus::Rejected);
        assert!(outcome.corrections.is_empty());
        service.shutdown().await;
    }

    #[test]
    fn test_fix_memory_evicts_oldest_target() {
        let mut memory = FixMemory::new(2);
        memory.remember("/p/a.rs".to_string(), normalize_error("unused import"));
        memory.remember("/p/b.rs".to_string(), normalize_error("todo marker"));
        memory.remember("/p/a.rs".to_string(), normalize_error("missing docs"));
        assert_eq!(memory.len(), 2);

        memory.remember("/p/c.rs".to_string(), normalize_error("todo marker"));
        assert_eq!(memory.len(), 2);
        assert!(memory.get("/p/b.rs").is_none());
        assert_eq!(
            memory.get("/p/a.rs"),
            Some(&normalize_error("missing docs"))
        );

        memory.forget("/p/a.rs");
        assert_eq!(memory.len(), 1);
        assert!(memory.get("/p/c.rs").is_some());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_refused() {
        let service = service(RuntimeConfig::default());
        service.shutdown().await;
        assert!(!service.is_running());

        let result = service
            .submit(
                Action::create("/project/notes.md", "hi\n"),
                ActionContext::new(),
                EnforcementMode::Strict,
                Arc::new(Echo),
            )
            .await;
        assert!(matches!(result, Err(RuntimeError::ShuttingDown)));
    }
}
