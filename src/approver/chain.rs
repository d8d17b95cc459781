//! Ordered evaluation chain for a single policy.

use std::sync::Arc;

use tracing::{debug, info_span, Instrument};

use super::Approver;
use crate::engine::context::DecisionContext;
use crate::models::policy::Policy;
use crate::models::request::CertificateRequest;
use crate::models::verdict::EvaluationVerdict;
use crate::Result;

/// Run `approvers` in order against `request` under `policy`.
///
/// The first denial stops the chain; its message is prefixed with the
/// approver's name. Every approver returning `NotDenied` yields `NotDenied`.
///
/// # Errors
///
/// The first failing approver call aborts the chain and its error is
/// returned unchanged, as are cancellation and deadline errors from `ctx`.
pub async fn evaluate(
    approvers: &[Arc<dyn Approver>],
    policy: &Policy,
    request: &CertificateRequest,
    ctx: &DecisionContext,
) -> Result<EvaluationVerdict> {
    let span = info_span!(
        "approver_chain",
        policy = %policy.name,
        request = %request.key(),
    );
    async move {
        for approver in approvers {
            let name = approver.name();
            let verdict = ctx
                .run(
                    &format!("evaluate {name}"),
                    approver.evaluate(policy, request),
                )
                .await?;
            if let EvaluationVerdict::Denied(message) = verdict {
                debug!(approver = %name, %message, "approver denied request");
                return Ok(EvaluationVerdict::Denied(format!("{name}: {message}")));
            }
        }
        Ok(EvaluationVerdict::NotDenied)
    }
    .instrument(span)
    .await
}
