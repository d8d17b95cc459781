//! Per-policy readiness aggregation.

use std::time::Duration;

use tracing::{debug, info_span, Instrument};

use super::registry::Registry;
use crate::engine::context::DecisionContext;
use crate::models::policy::Policy;
use crate::models::verdict::ReadinessVerdict;
use crate::{AppError, Result};

/// Combine the readiness of every approver that judges `policy`.
///
/// Approvers are consulted in registry order. The aggregate is ready only if
/// all of them are; otherwise it carries the first non-ready message and the
/// shortest recheck delay any approver asked for. A policy naming an
/// unregistered plugin is not ready and waits for the next change event.
///
/// # Errors
///
/// Propagates the first approver failure, cancellation, or deadline error.
pub async fn aggregate_readiness(
    registry: &Registry,
    policy: &Policy,
    ctx: &DecisionContext,
) -> Result<ReadinessVerdict> {
    let span = info_span!("aggregate_readiness", policy = %policy.name);
    async move {
        let approvers = match registry.resolve(policy) {
            Ok(approvers) => approvers,
            Err(AppError::UnknownPlugin(msg)) => {
                debug!(%msg, "policy references unknown plugin");
                return Ok(ReadinessVerdict::not_ready(msg));
            }
            Err(err) => return Err(err),
        };

        let mut verdicts = Vec::with_capacity(approvers.len());
        for approver in &approvers {
            let verdict = ctx
                .run(
                    &format!("ready {}", approver.name()),
                    approver.ready(policy),
                )
                .await?;
            debug!(approver = approver.name(), ready = verdict.ready, "approver readiness");
            verdicts.push((approver.name().to_owned(), verdict));
        }
        Ok(combine(&verdicts))
    }
    .instrument(span)
    .await
}

/// Fold individual verdicts, already in registry order.
#[must_use]
pub fn combine(verdicts: &[(String, ReadinessVerdict)]) -> ReadinessVerdict {
    let Some((name, first)) = verdicts.iter().find(|(_, v)| !v.ready) else {
        return ReadinessVerdict::ready();
    };

    let recheck_after: Option<Duration> = verdicts
        .iter()
        .filter_map(|(_, v)| v.recheck_after)
        .min();

    ReadinessVerdict {
        ready: false,
        message: format!("{name}: {}", first.message),
        recheck_after,
    }
}
