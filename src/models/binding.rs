//! Role binding model consumed by the RBAC authorizer.

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Kind of subject a binding grants to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubjectKind {
    /// A single principal, matched by username.
    User,
    /// Every member of a group.
    Group,
}

/// A principal or group named in a binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Subject {
    /// Subject kind.
    pub kind: SubjectKind,
    /// Username or group name.
    pub name: String,
}

/// Grants the `use` verb on matching policies to a set of subjects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RoleBinding {
    /// Binding name.
    pub name: String,
    /// Namespace the grant is limited to; absent grants cluster-wide.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Policy name patterns covered by the grant.
    pub policies: Vec<String>,
    /// Subjects receiving the grant.
    pub subjects: Vec<Subject>,
}

impl RoleBinding {
    /// Reject bindings that can never grant anything.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Invalid` if the name, policy list, or subject list is empty.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Invalid("role binding name must not be empty".into()));
        }
        if self.policies.is_empty() {
            return Err(AppError::Invalid(format!(
                "role binding {} lists no policies",
                self.name
            )));
        }
        if self.subjects.is_empty() {
            return Err(AppError::Invalid(format!(
                "role binding {} lists no subjects",
                self.name
            )));
        }
        Ok(())
    }
}
