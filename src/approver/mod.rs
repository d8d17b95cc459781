//! Pluggable approvers.
//!
//! Every approver, built-in or plugin, exposes the same two capabilities
//! through the [`Approver`] trait: readiness for a policy, and evaluation of
//! a request against a policy. The [`registry::Registry`] orders them and the
//! [`chain`] module runs them.

pub mod allowed;
pub mod chain;
pub mod constraints;
pub mod readiness;
pub mod registry;
pub mod webhook;

use std::future::Future;
use std::pin::Pin;

use crate::models::policy::Policy;
use crate::models::request::CertificateRequest;
use crate::models::verdict::{EvaluationVerdict, ReadinessVerdict};
use crate::Result;

/// Boxed future returned by approver capabilities.
pub type ApproverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A pluggable judge of certificate requests.
///
/// Implementations must be side-effect free with respect to the request: the
/// engine alone commits outcomes.
pub trait Approver: Send + Sync {
    /// Registry key. Plugin approvers are referenced by this name from a
    /// policy's plugin set.
    fn name(&self) -> &str;

    /// Whether the approver can evaluate requests for `policy`.
    ///
    /// # Errors
    ///
    /// Returns an error when readiness cannot be determined; the policy's
    /// published status is left untouched and the check is retried.
    fn ready<'a>(&'a self, policy: &'a Policy) -> ApproverFuture<'a, ReadinessVerdict>;

    /// Judge `request` under `policy`.
    ///
    /// # Errors
    ///
    /// Returns an error when no verdict could be produced. The error is
    /// never interpreted as either verdict.
    fn evaluate<'a>(
        &'a self,
        policy: &'a Policy,
        request: &'a CertificateRequest,
    ) -> ApproverFuture<'a, EvaluationVerdict>;
}

impl std::fmt::Debug for dyn Approver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Approver").field("name", &self.name()).finish()
    }
}
