//! Publishes each policy's aggregated readiness.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::events::{EventSender, WatchEvent};
use crate::approver::readiness;
use crate::approver::registry::Registry;
use crate::engine::context::DecisionContext;
use crate::models::policy::{PolicyStatus, ReadyCondition, REASON_NOT_READY, REASON_READY};
use crate::models::verdict::ReadinessVerdict;
use crate::persistence::Store;
use crate::Result;

/// Reconciles one policy's status against its approvers.
#[derive(Clone)]
pub struct PolicyReconciler {
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
    events: EventSender,
    timeout: Duration,
}

impl PolicyReconciler {
    /// Build a reconciler; each pass is bounded by `timeout`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<Registry>,
        events: EventSender,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            timeout,
        }
    }

    /// Aggregate readiness for `name` and publish it if it changed.
    ///
    /// Returns the recheck delay the approvers asked for, if any. A deleted
    /// policy is a no-op.
    ///
    /// # Errors
    ///
    /// Returns approver, cancellation, deadline, or store errors. The
    /// published status is left untouched on error.
    pub async fn reconcile(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Duration>> {
        let span = info_span!("reconcile_policy", policy = %name);
        async move {
            let Some(policy) = self.store.get_policy(name).await? else {
                debug!("policy no longer exists");
                return Ok(None);
            };

            let ctx = DecisionContext::new(cancel.child_token(), self.timeout);
            let verdict = readiness::aggregate_readiness(&self.registry, &policy, &ctx).await?;

            let status = next_status(&policy.status, &verdict, policy.generation);
            if status != policy.status {
                self.store.update_policy_status(name, &status).await?;
                info!(ready = verdict.ready, message = %verdict.message, "policy status updated");
                if self
                    .events
                    .send(WatchEvent::PolicyStatusChanged(name.to_owned()))
                    .await
                    .is_err()
                {
                    warn!("event channel closed, dropping status change");
                }
            }

            Ok(verdict.recheck_after)
        }
        .instrument(span)
        .await
    }
}

/// Status to publish for `verdict` computed against spec `generation`,
/// keeping the transition time unless the ready flag flipped.
#[must_use]
pub fn next_status(
    current: &PolicyStatus,
    verdict: &ReadinessVerdict,
    generation: i64,
) -> PolicyStatus {
    let (reason, message) = if verdict.ready {
        (REASON_READY, "CertificateRequestPolicy is ready for approval evaluation")
    } else {
        (REASON_NOT_READY, verdict.message.as_str())
    };

    let last_transition_time = match current.ready.as_ref() {
        Some(existing) if existing.ready == verdict.ready => existing.last_transition_time,
        _ => Utc::now(),
    };

    PolicyStatus {
        ready: Some(ReadyCondition {
            ready: verdict.ready,
            reason: reason.to_owned(),
            message: message.to_owned(),
            last_transition_time,
        }),
        observed_generation: generation,
    }
}
