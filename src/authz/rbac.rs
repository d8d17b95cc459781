//! In-process RBAC authorizer over role bindings.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::{AccessDecision, Authorizer};
use crate::models::binding::{RoleBinding, Subject, SubjectKind};
use crate::models::request::RequesterIdentity;
use crate::policy::glob;
use crate::Result;

/// Authorizer backed by an in-memory set of role bindings.
///
/// Bindings are replaced wholesale by the manifest watcher; checks always
/// observe a complete set.
#[derive(Debug, Clone, Default)]
pub struct RbacAuthorizer {
    bindings: Arc<RwLock<Vec<RoleBinding>>>,
}

impl RbacAuthorizer {
    /// Create an authorizer with no bindings (denies everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an authorizer seeded with `bindings`.
    #[must_use]
    pub fn with_bindings(bindings: Vec<RoleBinding>) -> Self {
        Self {
            bindings: Arc::new(RwLock::new(bindings)),
        }
    }

    /// Atomically replace the binding set. Returns whether it changed.
    pub async fn replace(&self, bindings: Vec<RoleBinding>) -> bool {
        let mut guard = self.bindings.write().await;
        if *guard == bindings {
            return false;
        }
        *guard = bindings;
        true
    }

    /// Snapshot of the current bindings.
    pub async fn bindings(&self) -> Vec<RoleBinding> {
        self.bindings.read().await.clone()
    }
}

impl Authorizer for RbacAuthorizer {
    fn check_use<'a>(
        &'a self,
        identity: &'a RequesterIdentity,
        policy: &'a str,
        namespace: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<AccessDecision>> + Send + 'a>>
    {
        Box::pin(async move {
            let bindings = self.bindings.read().await;
            let grant = bindings
                .iter()
                .find(|b| grants(b, identity, policy, namespace));
            Ok(match grant {
                Some(binding) => {
                    debug!(binding = %binding.name, policy, namespace, "use permitted");
                    AccessDecision::Allowed
                }
                None => AccessDecision::Denied,
            })
        })
    }
}

/// Whether a single binding grants `use` of `policy` in `namespace`.
#[must_use]
pub fn grants(
    binding: &RoleBinding,
    identity: &RequesterIdentity,
    policy: &str,
    namespace: &str,
) -> bool {
    binding.namespace.as_deref().is_none_or(|ns| ns == namespace)
        && binding.policies.iter().any(|p| glob::matches(p, policy))
        && binding.subjects.iter().any(|s| subject_matches(s, identity))
}

fn subject_matches(subject: &Subject, identity: &RequesterIdentity) -> bool {
    match subject.kind {
        SubjectKind::User => subject.name == identity.username,
        SubjectKind::Group => identity.groups.iter().any(|g| *g == subject.name),
    }
}
