//! Results produced by approvers.

use std::time::Duration;

/// Result of one approver judging one request against one policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationVerdict {
    /// The approver has no objection.
    NotDenied,
    /// The approver rejects the request with a reason.
    Denied(String),
}

impl EvaluationVerdict {
    /// Whether this verdict is a denial.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }
}

/// Readiness of an approver (or the aggregate of a policy's approvers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessVerdict {
    /// Whether evaluation may proceed.
    pub ready: bool,
    /// Human-readable explanation; empty when ready.
    pub message: String,
    /// Re-check delay requested while not ready.
    pub recheck_after: Option<Duration>,
}

impl ReadinessVerdict {
    /// A ready verdict.
    #[must_use]
    pub fn ready() -> Self {
        Self {
            ready: true,
            message: String::new(),
            recheck_after: None,
        }
    }

    /// A not-ready verdict without a recheck timer.
    #[must_use]
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self {
            ready: false,
            message: message.into(),
            recheck_after: None,
        }
    }

    /// Attach a recheck delay.
    #[must_use]
    pub fn recheck_after(mut self, delay: Duration) -> Self {
        self.recheck_after = Some(delay);
        self
    }
}
