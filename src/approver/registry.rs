//! Ordered approver registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use super::allowed::AllowedApprover;
use super::constraints::ConstraintsApprover;
use super::Approver;
use crate::models::policy::Policy;
use crate::{AppError, Result};

/// Built-in approvers, in evaluation order.
pub const BUILTIN_APPROVERS: &[&str] = &[AllowedApprover::NAME, ConstraintsApprover::NAME];

/// Explicitly constructed set of approvers handed to the engine.
///
/// Built-ins run first in registration order; plugins follow sorted by
/// name. The same order is used for readiness and evaluation so that the
/// reported denial is reproducible.
#[derive(Clone, Default)]
pub struct Registry {
    builtins: Vec<Arc<dyn Approver>>,
    plugins: BTreeMap<String, Arc<dyn Approver>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field(
                "builtins",
                &self.builtins.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `allowed` and `constraints` approvers.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new()
            .with_builtin(Arc::new(AllowedApprover))
            .with_builtin(Arc::new(ConstraintsApprover))
    }

    /// Append an implicit approver that runs for every policy.
    #[must_use]
    pub fn with_builtin(mut self, approver: Arc<dyn Approver>) -> Self {
        self.builtins.push(approver);
        self
    }

    /// Register a plugin approver under its own name, replacing any previous
    /// plugin of that name.
    #[must_use]
    pub fn with_plugin(mut self, approver: Arc<dyn Approver>) -> Self {
        let name = approver.name().to_owned();
        if self.plugins.insert(name.clone(), approver).is_some() {
            warn!(plugin = %name, "replacing previously registered plugin");
        }
        self
    }

    /// Names of registered plugins, in evaluation order.
    #[must_use]
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    /// Whether a plugin of this name is registered.
    #[must_use]
    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// The approvers that judge `policy`: every built-in, then each plugin
    /// named in the policy's plugin set, by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownPlugin` naming the first plugin the policy
    /// references that is not registered.
    pub fn resolve(&self, policy: &Policy) -> Result<Vec<Arc<dyn Approver>>> {
        let mut approvers = self.builtins.clone();
        for name in policy.spec.plugins.keys() {
            let plugin = self.plugins.get(name).ok_or_else(|| {
                AppError::UnknownPlugin(format!(
                    "policy {:?} references unregistered plugin {name:?}",
                    policy.name
                ))
            })?;
            approvers.push(Arc::clone(plugin));
        }
        Ok(approvers)
    }
}
