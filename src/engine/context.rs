//! Cancellation and deadline plumbing for external calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{AppError, Result};

/// Ambient cancellation token and deadline for one reconciliation.
///
/// Every authorization and approver call made on behalf of the
/// reconciliation is bounded by [`DecisionContext::run`].
#[derive(Debug, Clone)]
pub struct DecisionContext {
    cancel: CancellationToken,
    deadline: Instant,
}

impl DecisionContext {
    /// Build a context that expires `timeout` from now.
    #[must_use]
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + timeout,
        }
    }

    /// Context with a fresh token, for callers that never cancel.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(CancellationToken::new(), timeout)
    }

    /// Drive `fut` to completion unless the context is cancelled or expires.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` or `AppError::DeadlineExceeded` naming
    /// `operation`, or whatever error `fut` itself produces.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(AppError::Cancelled(operation.to_owned())),
            res = tokio::time::timeout_at(self.deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(AppError::DeadlineExceeded(operation.to_owned())),
            },
        }
    }
}
