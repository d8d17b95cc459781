//! Combines every eligible policy's verdict into one terminal decision.

use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::approver::chain;
use crate::approver::registry::Registry;
use crate::authz::{self, Authorizer};
use crate::engine::context::DecisionContext;
use crate::models::namespace::Namespace;
use crate::models::policy::Policy;
use crate::models::request::CertificateRequest;
use crate::models::verdict::EvaluationVerdict;
use crate::policy::selector;
use crate::{AppError, Result};

/// Message carried by a pending decision with no eligible policy.
pub const NO_ELIGIBLE_POLICY: &str = "no CertificateRequestPolicies bound or applicable";

/// Result of [`DecisionCombiner::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// The request already carries a terminal outcome; nothing was done.
    AlreadyDecided,
    /// No policy is eligible; the request stays pending.
    Pending {
        /// Why no outcome was reached.
        reason: String,
    },
    /// Every eligible policy returned `NotDenied`.
    Approved {
        /// Human-readable explanation.
        message: String,
        /// Eligible policies, by name.
        policies: Vec<String>,
    },
    /// At least one eligible policy denied the request.
    Denied {
        /// The first denial, by policy name order.
        message: String,
        /// The denying policy.
        policy: String,
    },
}

/// The selection-and-decision engine.
///
/// Holds its collaborators explicitly; there is no process-global state.
#[derive(Clone)]
pub struct DecisionCombiner {
    registry: Arc<Registry>,
    authorizer: Arc<dyn Authorizer>,
}

impl DecisionCombiner {
    /// Build an engine over an approver registry and authorization backend.
    #[must_use]
    pub fn new(registry: Arc<Registry>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            registry,
            authorizer,
        }
    }

    /// The approver registry used for evaluation.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Decide `request` against a consistent snapshot of `policies` and the
    /// request's `namespace`.
    ///
    /// Policies are visited in name order. Each is checked against its
    /// selector, then its published readiness, then the authorization
    /// backend; the survivors each run their approver chain. Any denial
    /// wins; otherwise the request is approved. With no survivors the
    /// request stays pending.
    ///
    /// # Errors
    ///
    /// Retryable errors (authorization indeterminate, approver failure,
    /// cancellation, deadline) abort the whole decision. A policy naming an
    /// unregistered plugin is skipped; its `UnknownPlugin` error is returned
    /// only if no other policy denied.
    pub async fn decide(
        &self,
        request: &CertificateRequest,
        policies: &[Policy],
        namespace: &Namespace,
        ctx: &DecisionContext,
    ) -> Result<DecisionOutcome> {
        let span = info_span!("decide", request = %request.key());
        async move {
            if request.is_decided() {
                return Ok(DecisionOutcome::AlreadyDecided);
            }

            let eligible = self.eligible(request, policies, namespace, ctx).await?;
            if eligible.is_empty() {
                debug!("no eligible policy, leaving request pending");
                return Ok(DecisionOutcome::Pending {
                    reason: NO_ELIGIBLE_POLICY.to_owned(),
                });
            }

            let mut approved_by = Vec::with_capacity(eligible.len());
            let mut unresolved: Option<AppError> = None;

            for policy in eligible {
                let approvers = match self.registry.resolve(policy) {
                    Ok(approvers) => approvers,
                    Err(err) => {
                        warn!(policy = %policy.name, %err, "policy cannot be evaluated");
                        unresolved.get_or_insert(err);
                        continue;
                    }
                };

                match chain::evaluate(&approvers, policy, request, ctx).await? {
                    EvaluationVerdict::Denied(message) => {
                        info!(policy = %policy.name, %message, "request denied");
                        return Ok(DecisionOutcome::Denied {
                            message: format!(
                                "Denied by CertificateRequestPolicy {:?}: {message}",
                                policy.name
                            ),
                            policy: policy.name.clone(),
                        });
                    }
                    EvaluationVerdict::NotDenied => approved_by.push(policy.name.clone()),
                }
            }

            if let Some(err) = unresolved {
                return Err(err);
            }

            let quoted: Vec<String> = approved_by.iter().map(|n| format!("{n:?}")).collect();
            info!(policies = ?approved_by, "request approved");
            Ok(DecisionOutcome::Approved {
                message: format!("Approved by CertificateRequestPolicy: {}", quoted.join(", ")),
                policies: approved_by,
            })
        }
        .instrument(span)
        .await
    }

    /// Policies that select the request, are ready, and are usable by the
    /// requester, in name order. Cheapest check first.
    async fn eligible<'p>(
        &self,
        request: &CertificateRequest,
        policies: &'p [Policy],
        namespace: &Namespace,
        ctx: &DecisionContext,
    ) -> Result<Vec<&'p Policy>> {
        let mut ordered: Vec<&Policy> = policies.iter().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));

        let mut eligible = Vec::new();
        for policy in ordered {
            if !selector::select(&policy.spec.selector, &request.issuer_ref, namespace) {
                continue;
            }
            if !policy.is_ready() {
                debug!(policy = %policy.name, "policy selects request but is not ready");
                continue;
            }
            let allowed = authz::authorized(
                self.authorizer.as_ref(),
                &request.requester,
                &policy.name,
                &request.namespace,
                ctx,
            )
            .await?;
            if !allowed {
                debug!(policy = %policy.name, "requester not permitted to use policy");
                continue;
            }
            eligible.push(policy);
        }
        Ok(eligible)
    }
}
