//! Drives one request to a terminal outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::engine::combiner::{DecisionCombiner, DecisionOutcome};
use crate::engine::context::DecisionContext;
use crate::models::request::{Decision, RequestKey, TerminalOutcome};
use crate::persistence::Store;
use crate::{AppError, Result};

/// Reconciles a request against a fresh snapshot of policies and namespace.
#[derive(Clone)]
pub struct RequestReconciler {
    store: Arc<dyn Store>,
    combiner: DecisionCombiner,
    timeout: Duration,
}

impl RequestReconciler {
    /// Build a reconciler; each decision is bounded by `timeout`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, combiner: DecisionCombiner, timeout: Duration) -> Self {
        Self {
            store,
            combiner,
            timeout,
        }
    }

    /// Decide `key` and commit an approved or denied outcome.
    ///
    /// A missing or already decided request is a no-op, as is losing the
    /// commit race to another writer. Pending requests are left untouched
    /// and picked up again on the next relevant change.
    ///
    /// # Errors
    ///
    /// Returns retryable errors (store, authorization, approver,
    /// cancellation, deadline, missing namespace) and the non-retryable
    /// `UnknownPlugin`. No outcome is written on error.
    pub async fn reconcile(
        &self,
        key: &RequestKey,
        cancel: &CancellationToken,
    ) -> Result<DecisionOutcome> {
        let span = info_span!("reconcile_request", request = %key);
        async move {
            let Some(request) = self.store.get_request(key).await? else {
                debug!("request no longer exists");
                return Ok(DecisionOutcome::AlreadyDecided);
            };
            if request.is_decided() {
                return Ok(DecisionOutcome::AlreadyDecided);
            }

            let namespace = self
                .store
                .get_namespace(&request.namespace)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("namespace {} not found", request.namespace))
                })?;
            let policies = self.store.list_policies().await?;

            let ctx = DecisionContext::new(cancel.child_token(), self.timeout);
            let outcome = self
                .combiner
                .decide(&request, &policies, &namespace, &ctx)
                .await?;

            let terminal = match &outcome {
                DecisionOutcome::Approved { message, .. } => {
                    TerminalOutcome::new(Decision::Approved, message.clone())
                }
                DecisionOutcome::Denied { message, .. } => {
                    TerminalOutcome::new(Decision::Denied, message.clone())
                }
                DecisionOutcome::Pending { reason } => {
                    debug!(%reason, "request remains pending");
                    return Ok(outcome);
                }
                DecisionOutcome::AlreadyDecided => return Ok(outcome),
            };

            match self.store.set_outcome(key, &terminal).await {
                Ok(()) => {
                    info!(decision = terminal.decision.as_str(), "outcome committed");
                    Ok(outcome)
                }
                Err(AppError::AlreadyDecided(_)) => {
                    debug!("outcome already committed elsewhere");
                    Ok(DecisionOutcome::AlreadyDecided)
                }
                Err(err) => Err(err),
            }
        }
        .instrument(span)
        .await
    }
}
