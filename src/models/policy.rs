//! Certificate request policy model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Administrator-defined rule set governing which requests it applies to and
/// which approvers judge them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Policy {
    /// Unique policy name.
    pub name: String,
    /// Administrator-owned specification.
    pub spec: PolicySpec,
    /// Bumped by the store whenever `spec` changes.
    #[serde(default)]
    pub generation: i64,
    /// Readiness status, owned by the readiness aggregator.
    #[serde(default)]
    pub status: PolicyStatus,
}

impl Policy {
    /// Construct a policy with an empty status.
    #[must_use]
    pub fn new(name: impl Into<String>, spec: PolicySpec) -> Self {
        Self {
            name: name.into(),
            spec,
            generation: 0,
            status: PolicyStatus::default(),
        }
    }

    /// Whether the last published readiness condition reports ready for
    /// the current spec.
    ///
    /// A policy that has never been aggregated, or whose spec changed since
    /// its status was published, is not ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status.observed_generation == self.generation
            && self.status.ready.as_ref().is_some_and(|c| c.ready)
    }

    /// Reject structurally invalid policies before they enter the store.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Invalid` if the name is empty or the namespace
    /// label selector is malformed.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Invalid("policy name must not be empty".into()));
        }
        if let Some(labels) = self
            .spec
            .selector
            .namespace
            .as_ref()
            .and_then(|ns| ns.label_selector.as_ref())
        {
            labels
                .validate()
                .map_err(|err| AppError::Invalid(format!("policy {}: {err}", self.name)))?;
        }
        Ok(())
    }
}

/// Policy specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct PolicySpec {
    /// Which requests this policy governs.
    #[serde(default)]
    pub selector: PolicySelector,
    /// Named plugin approvers and their opaque configuration.
    #[serde(default)]
    pub plugins: PluginSet,
    /// Attribute allow-list consumed by the built-in `allowed` approver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<AllowedSpec>,
    /// Bounds consumed by the built-in `constraints` approver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<ConstraintsSpec>,
}

/// Plugin name to opaque configuration. Ordered by name.
pub type PluginSet = BTreeMap<String, serde_json::Value>;

/// Issuer and namespace selection criteria.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PolicySelector {
    /// Issuer reference patterns; absent matches every issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_ref: Option<IssuerRefSelector>,
    /// Namespace patterns and labels; absent matches every namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<NamespaceSelector>,
}

/// Wildcard patterns over the request's issuer reference. Unset fields
/// default to `*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct IssuerRefSelector {
    /// Issuer name pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Issuer kind pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Issuer API group pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Namespace name patterns and label requirements.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NamespaceSelector {
    /// Namespace name patterns, any of which may match.
    #[serde(default)]
    pub match_names: Vec<String>,
    /// Label requirements the namespace must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
}

/// Standard label selector: equality map plus set-based expressions, all
/// ANDed together.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LabelSelector {
    /// Labels that must be present with exactly these values.
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    /// Set-based requirements.
    #[serde(default)]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// Whether the selector carries no requirements at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Check operator/value consistency of every expression.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Invalid` when `In`/`NotIn` have no values or
    /// `Exists`/`DoesNotExist` carry values.
    pub fn validate(&self) -> Result<()> {
        for req in &self.match_expressions {
            match req.operator {
                LabelOperator::In | LabelOperator::NotIn if req.values.is_empty() => {
                    return Err(AppError::Invalid(format!(
                        "label requirement on {:?} needs at least one value",
                        req.key
                    )));
                }
                LabelOperator::Exists | LabelOperator::DoesNotExist if !req.values.is_empty() => {
                    return Err(AppError::Invalid(format!(
                        "label requirement on {:?} must not carry values",
                        req.key
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// A single set-based label requirement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LabelSelectorRequirement {
    /// Label key the requirement applies to.
    pub key: String,
    /// Relationship between the label and `values`.
    pub operator: LabelOperator,
    /// Operand values.
    #[serde(default)]
    pub values: Vec<String>,
}

/// Label requirement operator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LabelOperator {
    /// Label present and its value in the set.
    In,
    /// Label absent or its value outside the set.
    NotIn,
    /// Label present with any value.
    Exists,
    /// Label absent.
    DoesNotExist,
}

/// A wildcard pattern for a single-valued attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AllowedString {
    /// Permitted value pattern; absent permits nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Whether the request must populate the attribute.
    #[serde(default)]
    pub required: bool,
}

/// Wildcard patterns for a multi-valued attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AllowedStringSlice {
    /// Permitted value patterns; every requested value must match one.
    #[serde(default)]
    pub values: Vec<String>,
    /// Whether the request must populate the attribute.
    #[serde(default)]
    pub required: bool,
}

/// Attribute allow-list judged by the built-in `allowed` approver.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AllowedSpec {
    /// Subject common name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<AllowedString>,
    /// DNS subject alternative names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_names: Option<AllowedStringSlice>,
    /// IP subject alternative names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_addresses: Option<AllowedStringSlice>,
    /// URI subject alternative names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uris: Option<AllowedStringSlice>,
    /// Email subject alternative names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_addresses: Option<AllowedStringSlice>,
    /// Whether CA certificates may be requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ca: Option<bool>,
    /// Permitted key usages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usages: Option<Vec<String>>,
}

/// Bounds judged by the built-in `constraints` approver.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConstraintsSpec {
    /// Shortest permitted certificate duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration_seconds: Option<u64>,
    /// Longest permitted certificate duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_seconds: Option<u64>,
    /// Private key requirements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PrivateKeyConstraints>,
}

/// Private key algorithm and size bounds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PrivateKeyConstraints {
    /// Required key algorithm (e.g. `RSA`, `ECDSA`, `Ed25519`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    /// Smallest permitted key size in bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u32>,
    /// Largest permitted key size in bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u32>,
}

/// Published policy status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PolicyStatus {
    /// Ready condition, absent until the first aggregation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<ReadyCondition>,
    /// Spec generation the condition was computed from.
    #[serde(default)]
    pub observed_generation: i64,
}

/// Reason recorded on a ready policy.
pub const REASON_READY: &str = "Ready";
/// Reason recorded on a policy that is not ready.
pub const REASON_NOT_READY: &str = "NotReady";

/// Readiness condition published on a policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReadyCondition {
    /// Whether the policy may take part in decisions.
    pub ready: bool,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable explanation.
    pub message: String,
    /// When `ready` last flipped.
    pub last_transition_time: DateTime<Utc>,
}
