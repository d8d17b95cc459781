//! Authorization gate: may this requester use this policy here?

pub mod rbac;

use std::future::Future;
use std::pin::Pin;

use crate::engine::context::DecisionContext;
use crate::models::request::RequesterIdentity;
use crate::{AppError, Result};

/// Answer from an authorization backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// The identity may use the policy in the namespace.
    Allowed,
    /// The identity may not use the policy in the namespace.
    Denied,
    /// The backend could not decide.
    Indeterminate(String),
}

/// Remote permission check keyed by identity, policy name, and namespace.
pub trait Authorizer: Send + Sync {
    /// Check the `use` permission.
    ///
    /// # Errors
    ///
    /// Transport failures may be reported either as an error or as
    /// [`AccessDecision::Indeterminate`]; the gate treats both alike.
    fn check_use<'a>(
        &'a self,
        identity: &'a RequesterIdentity,
        policy: &'a str,
        namespace: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AccessDecision>> + Send + 'a>>;
}

/// Whether `identity` may have its request judged by `policy` in `namespace`.
///
/// # Errors
///
/// Returns `AppError::Authorization` when the backend cannot decide, and
/// cancellation or deadline errors from `ctx`. Neither is ever reported as
/// "not authorized".
pub async fn authorized(
    authorizer: &dyn Authorizer,
    identity: &RequesterIdentity,
    policy: &str,
    namespace: &str,
    ctx: &DecisionContext,
) -> Result<bool> {
    let decision = ctx
        .run(
            "authorization check",
            authorizer.check_use(identity, policy, namespace),
        )
        .await?;
    match decision {
        AccessDecision::Allowed => Ok(true),
        AccessDecision::Denied => Ok(false),
        AccessDecision::Indeterminate(reason) => Err(AppError::Authorization(format!(
            "use of policy {policy:?} by {:?} in {namespace:?}: {reason}",
            identity.username
        ))),
    }
}
