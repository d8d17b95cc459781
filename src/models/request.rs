//! Certificate request model.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reason recorded on every terminal outcome written by this engine.
pub const OUTCOME_REASON: &str = "policy.cert-manager.io";

/// Identity of a request: its namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    /// Namespace the request lives in.
    pub namespace: String,
    /// Request name, unique within the namespace.
    pub name: String,
}

impl RequestKey {
    /// Construct a key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for RequestKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The issuer a request asks to be signed by.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct IssuerTarget {
    /// Issuer name.
    pub name: String,
    /// Issuer kind.
    #[serde(default)]
    pub kind: String,
    /// Issuer API group.
    #[serde(default)]
    pub group: String,
}

/// Who submitted the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RequesterIdentity {
    /// Principal name.
    pub username: String,
    /// Group memberships.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Extra identity attributes.
    #[serde(default)]
    pub extra: BTreeMap<String, Vec<String>>,
}

/// Decoded view of the signing request consumed by the built-in approvers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RequestAttributes {
    /// Subject common name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    /// DNS subject alternative names.
    #[serde(default)]
    pub dns_names: Vec<String>,
    /// IP subject alternative names.
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    /// URI subject alternative names.
    #[serde(default)]
    pub uris: Vec<String>,
    /// Email subject alternative names.
    #[serde(default)]
    pub email_addresses: Vec<String>,
    /// Whether a CA certificate is requested.
    #[serde(default)]
    pub is_ca: bool,
    /// Requested key usages.
    #[serde(default)]
    pub usages: Vec<String>,
    /// Requested certificate duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    /// Private key algorithm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_algorithm: Option<String>,
    /// Private key size in bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
}

/// Terminal decision kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The request may be signed.
    Approved,
    /// The request must not be signed.
    Denied,
}

impl Decision {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }
}

/// The single, immutable-once-set verdict recorded on a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TerminalOutcome {
    /// Approved or denied.
    pub decision: Decision,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable explanation.
    pub message: String,
    /// When the outcome was committed.
    pub decided_at: DateTime<Utc>,
}

impl TerminalOutcome {
    /// Build an outcome stamped with the current time.
    #[must_use]
    pub fn new(decision: Decision, message: impl Into<String>) -> Self {
        Self {
            decision,
            reason: OUTCOME_REASON.to_owned(),
            message: message.into(),
            decided_at: Utc::now(),
        }
    }
}

/// A certificate-issuance request awaiting an outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CertificateRequest {
    /// Namespace the request lives in.
    pub namespace: String,
    /// Request name.
    pub name: String,
    /// Server-assigned unique identifier.
    #[serde(default)]
    pub uid: String,
    /// Target issuer.
    pub issuer_ref: IssuerTarget,
    /// Submitting identity.
    #[serde(default)]
    pub requester: RequesterIdentity,
    /// Opaque encoded signing request.
    #[serde(default)]
    pub request: String,
    /// Decoded request attributes.
    #[serde(default)]
    pub attributes: RequestAttributes,
    /// Terminal outcome, absent while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TerminalOutcome>,
    /// Creation timestamp.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl CertificateRequest {
    /// Construct a new pending request.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        issuer_ref: IssuerTarget,
        requester: RequesterIdentity,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: Uuid::new_v4().to_string(),
            issuer_ref,
            requester,
            request: String::new(),
            attributes: RequestAttributes::default(),
            outcome: None,
            created_at: Utc::now(),
        }
    }

    /// The request's identity.
    #[must_use]
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.namespace, &self.name)
    }

    /// Whether a terminal outcome has been recorded.
    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.outcome.is_some()
    }
}
