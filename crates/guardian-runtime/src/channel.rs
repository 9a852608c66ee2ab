//! Human-in-the-loop channel.
//!
//! The coordinator asks a human through a `HumanChannel` when a decision is
//! escalated, when a warning needs confirmation, or when a suggested fix
//! waits for approval. How the human is prompted is up to the channel.
//!
//! Every request is fail-closed: a channel error, an open circuit or an
//! elapsed timeout all resolve to `EscalationResolution::TimedOut`, which the
//! caller treats as REJECT.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::decision::EscalationResolution;
use crate::resilience::ChannelBreaker;

/// Why a human is being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    /// The pre-guardian escalated the action
    Escalation,
    /// An APPROVE_WITH_WARNING needs confirmation
    Confirmation,
    /// A correction is proposed for a rejected action
    SuggestedFix,
}

impl fmt::Display for ReviewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewKind::Escalation => f.write_str("escalation"),
            ReviewKind::Confirmation => f.write_str("confirmation"),
            ReviewKind::SuggestedFix => f.write_str("suggested_fix"),
        }
    }
}

/// A question put to a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub action_id: Uuid,
    pub target: String,
    pub kind: ReviewKind,
    pub reason: String,
    /// Payload the human is asked about (proposed content or suggested fix)
    pub payload: String,
}

/// Answer from a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelResponse {
    Approve,
    Reject { reason: String },
    Timeout,
}

/// Errors from channel implementations.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    #[error("Channel I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A way to ask a human for a decision.
#[async_trait]
pub trait HumanChannel: Send + Sync {
    /// Ask and wait for an answer.
    ///
    /// Implementations may return early with `ChannelResponse::Timeout`;
    /// the caller also enforces `timeout` on its side.
    async fn request(
        &self,
        request: &ReviewRequest,
        timeout: Duration,
    ) -> Result<ChannelResponse, ChannelError>;
}

/// A channel that rejects every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDenyChannel;

#[async_trait]
impl HumanChannel for AutoDenyChannel {
    async fn request(
        &self,
        _request: &ReviewRequest,
        _timeout: Duration,
    ) -> Result<ChannelResponse, ChannelError> {
        Ok(ChannelResponse::Reject {
            reason: "automatic denial".to_string(),
        })
    }
}

/// Ask through `channel`, bounded by `timeout`, failing closed.
pub async fn review(
    channel: &dyn HumanChannel,
    breaker: &ChannelBreaker,
    request: &ReviewRequest,
    timeout: Duration,
) -> EscalationResolution {
    if !breaker.admits(request.kind) {
        tracing::warn!(
            action_id = %request.action_id,
            kind = %request.kind,
            "Human channel circuit open, treating review as timed out"
        );
        return EscalationResolution::TimedOut;
    }

    match tokio::time::timeout(timeout, channel.request(request, timeout)).await {
        Ok(Ok(ChannelResponse::Approve)) => {
            breaker.record(request.kind, true);
            EscalationResolution::Approved
        }
        Ok(Ok(ChannelResponse::Reject { reason })) => {
            breaker.record(request.kind, true);
            EscalationResolution::Rejected { reason }
        }
        Ok(Ok(ChannelResponse::Timeout)) => {
            tracing::warn!(action_id = %request.action_id, kind = %request.kind, "Review timed out");
            EscalationResolution::TimedOut
        }
        Ok(Err(e)) => {
            breaker.record(request.kind, false);
            tracing::warn!(
                action_id = %request.action_id,
                kind = %request.kind,
                error = %e,
                "Human channel failed, treating review as timed out"
            );
            EscalationResolution::TimedOut
        }
        Err(_) => {
            tracing::warn!(
                action_id = %request.action_id,
                kind = %request.kind,
                timeout = %humantime::format_duration(timeout),
                "No answer before the review timeout"
            );
            EscalationResolution::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::BreakerConfig;

    struct Never;

    #[async_trait]
    impl HumanChannel for Never {
        async fn request(
            &self,
            _request: &ReviewRequest,
            _timeout: Duration,
        ) -> Result<ChannelResponse, ChannelError> {
            std::future::pending().await
        }
    }

    struct Broken;

    #[async_trait]
    impl HumanChannel for Broken {
        async fn request(
            &self,
            _request: &ReviewRequest,
            _timeout: Duration,
        ) -> Result<ChannelResponse, ChannelError> {
            Err(ChannelError::Unavailable("socket closed".to_string()))
        }
    }

    fn request() -> ReviewRequest {
        ReviewRequest {
            action_id: Uuid::new_v4(),
            target: "/project/.env".to_string(),
            kind: ReviewKind::Escalation,
            reason: "risk CRITICAL".to_string(),
            payload: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_times_out() {
        let breaker = ChannelBreaker::default();
        let resolution = review(&Never, &breaker, &request(), Duration::from_secs(300)).await;
        assert_eq!(resolution, EscalationResolution::TimedOut);
    }

    #[tokio::test]
    async fn test_channel_failure_is_fail_closed() {
        let breaker = ChannelBreaker::default();
        let resolution = review(&Broken, &breaker, &request(), Duration::from_secs(1)).await;
        assert_eq!(resolution, EscalationResolution::TimedOut);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_channel() {
        let breaker = ChannelBreaker::new(BreakerConfig {
            failure_threshold: 1,
            ..BreakerConfig::default()
        });
        review(&Broken, &breaker, &request(), Duration::from_secs(1)).await;
        assert!(!breaker.admits(ReviewKind::Escalation));

        let resolution = review(&AutoDenyChannel, &breaker, &request(), Duration::from_secs(1)).await;
        assert_eq!(resolution, EscalationResolution::TimedOut);
    }

    #[tokio::test]
    async fn test_auto_deny() {
        let breaker = ChannelBreaker::default();
        let resolution = review(&AutoDenyChannel, &breaker, &request(), Duration::from_secs(1)).await;
        assert!(matches!(resolution, EscalationResolution::Rejected { .. }));
    }
}
