//! Protection event log.
//!
//! Every decision the service makes becomes one `ProtectionEvent`, appended
//! to each configured `AuditSink`. Two sinks ship with the crate:
//!
//! - `AuditLog`: in memory, optionally retention-bounded, with a broadcast
//!   subscription for live consumers
//! - `JsonlAuditSink`: one JSON object per line in an append-only file

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use guardian_core::Action;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::correction::FixKind;
use crate::decision::GuardianDecision;
use crate::report::{CycleReport, CycleStatus};

const BROADCAST_CAPACITY: usize = 256;

/// Errors from audit sinks.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Failed to open audit log {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Completed,
    Rejected,
    Interrupted,
    Bypassed,
    /// A fix was applied and the action resubmitted
    Corrected,
    /// A suggested fix was declined or went unanswered
    SuggestionDeclined,
}

impl From<CycleStatus> for EventStatus {
    fn from(status: CycleStatus) -> Self {
        match status {
            CycleStatus::Completed => EventStatus::Completed,
            CycleStatus::Rejected => EventStatus::Rejected,
            CycleStatus::Interrupted => EventStatus::Interrupted,
            CycleStatus::Bypassed => EventStatus::Bypassed,
        }
    }
}

/// A correction applied on behalf of the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub fixes: Vec<FixKind>,
    pub original_action: Action,
    pub corrected_action: Action,
    /// `"auto"` for AUTO_FIX_SIMPLE, `"reviewer"` for an approved suggestion
    pub approved_by: String,
}

/// One entry of the audit stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionEvent {
    pub timestamp: DateTime<Utc>,
    pub action_id: Uuid,
    pub target: String,
    pub status: EventStatus,

    /// The decision that settled the cycle, if a guardian made one
    pub decision: Option<GuardianDecision>,
    pub reason: Option<String>,
    pub correction_applied: Option<CorrectionRecord>,
}

impl ProtectionEvent {
    /// The event for a finished cycle.
    pub fn from_report(report: &CycleReport) -> Self {
        Self {
            timestamp: report.finished_at,
            action_id: report.action_id,
            target: report.target.clone(),
            status: report.status.into(),
            decision: report
                .post_decision
                .clone()
                .or_else(|| report.pre_decision.clone()),
            reason: report.rejection_reason(),
            correction_applied: None,
        }
    }

    /// The event for an applied correction.
    pub fn corrected(timestamp: DateTime<Utc>, record: CorrectionRecord) -> Self {
        let fixes: Vec<String> = record.fixes.iter().map(|f| f.to_string()).collect();
        Self {
            timestamp,
            action_id: record.original_action.id,
            target: record.original_action.target.clone(),
            status: EventStatus::Corrected,
            decision: None,
            reason: Some(format!(
                "resubmitted as {} after {}",
                record.corrected_action.id,
                fixes.join(", ")
            )),
            correction_applied: Some(record),
        }
    }
}

/// Destination for protection events.
pub trait AuditSink: Send + Sync {
    fn append(&self, event: &ProtectionEvent) -> Result<(), AuditError>;
}

/// In-memory event log with live subscription.
pub struct AuditLog {
    events: Mutex<VecDeque<ProtectionEvent>>,
    retention: Option<usize>,
    sender: broadcast::Sender<ProtectionEvent>,
}

impl AuditLog {
    /// Create a log keeping at most `retention` events (`None` keeps everything).
    pub fn new(retention: Option<usize>) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            events: Mutex::new(VecDeque::new()),
            retention,
            sender,
        }
    }

    /// Receive every event appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProtectionEvent> {
        self.sender.subscribe()
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<ProtectionEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AuditSink for AuditLog {
    fn append(&self, event: &ProtectionEvent) -> Result<(), AuditError> {
        {
            let mut events = self.events.lock();
            events.push_back(event.clone());
            if let Some(retention) = self.retention {
                while events.len() > retention {
                    events.pop_front();
                }
            }
        }
        // No subscribers is fine
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Append-only JSON Lines file.
pub struct JsonlAuditSink {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JsonlAuditSink {
    /// Open (or create) the file in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every event from a JSONL file, skipping blank lines.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<ProtectionEvent>, AuditError> {
        let file = File::open(path.as_ref()).map_err(|source| AuditError::OpenFailed {
            path: path.as_ref().to_path_buf(),
            source,
        })?;

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, event: &ProtectionEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(event)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }
}
