//! Remote plugin approver reached over HTTP.
//!
//! ## Protocol
//!
//! Readiness: `POST {endpoint}/ready`
//! ```json
//! {"policy": { ... }, "config": { ... }}
//! ```
//! answered with
//! ```json
//! {"ready": false, "message": "syncing", "recheck_after_millis": 50}
//! ```
//!
//! Evaluation: `POST {endpoint}/evaluate`
//! ```json
//! {"policy": { ... }, "request": { ... }, "config": { ... }}
//! ```
//! answered with
//! ```json
//! {"result": "denied", "message": "key too weak"}
//! ```
//!
//! `config` is the policy's plugin-set entry for this plugin (`null` when
//! absent). Any transport failure or non-success status is an approver error.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Approver, ApproverFuture};
use crate::models::policy::Policy;
use crate::models::request::CertificateRequest;
use crate::models::verdict::{EvaluationVerdict, ReadinessVerdict};
use crate::{AppError, Result};

#[derive(Debug, Serialize)]
struct ReadyCall<'a> {
    policy: &'a Policy,
    config: Option<&'a serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct EvaluateCall<'a> {
    policy: &'a Policy,
    request: &'a CertificateRequest,
    config: Option<&'a serde_json::Value>,
}

/// Readiness answer from a plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadyReply {
    /// Whether the plugin is ready for this policy.
    pub ready: bool,
    /// Explanation when not ready.
    #[serde(default)]
    pub message: String,
    /// Requested recheck delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recheck_after_millis: Option<u64>,
}

/// Evaluation result kind reported by a plugin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PluginResult {
    /// No objection.
    NotDenied,
    /// Rejected.
    Denied,
}

/// Evaluation answer from a plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluateReply {
    /// Verdict kind.
    pub result: PluginResult,
    /// Explanation for a denial.
    #[serde(default)]
    pub message: String,
}

/// Plugin approver delegating both capabilities to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookApprover {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl WebhookApprover {
    /// Build a plugin client with a per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be constructed.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Config(format!("failed to build plugin client: {err}")))?;
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
            client,
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{path}", self.endpoint);
        debug!(plugin = %self.name, %url, "calling plugin");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| {
                AppError::Approver(format!("{}: {path} call failed: {err}", self.name))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Approver(format!(
                "{}: {path} returned {status}",
                self.name
            )));
        }

        response
            .json::<R>()
            .await
            .map_err(|err| {
                AppError::Approver(format!("{}: malformed {path} reply: {err}", self.name))
            })
    }
}

impl Approver for WebhookApprover {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready<'a>(&'a self, policy: &'a Policy) -> ApproverFuture<'a, ReadinessVerdict> {
        Box::pin(async move {
            let call = ReadyCall {
                policy,
                config: policy.spec.plugins.get(&self.name),
            };
            let reply: ReadyReply = self.post("ready", &call).await?;
            Ok(ReadinessVerdict {
                ready: reply.ready,
                message: reply.message,
                recheck_after: reply.recheck_after_millis.map(Duration::from_millis),
            })
        })
    }

    fn evaluate<'a>(
        &'a self,
        policy: &'a Policy,
        request: &'a CertificateRequest,
    ) -> ApproverFuture<'a, EvaluationVerdict> {
        Box::pin(async move {
            let call = EvaluateCall {
                policy,
                request,
                config: policy.spec.plugins.get(&self.name),
            };
            let reply: EvaluateReply = self.post("evaluate", &call).await?;
            Ok(match reply.result {
                PluginResult::NotDenied => EvaluationVerdict::NotDenied,
                PluginResult::Denied => EvaluationVerdict::Denied(reply.message),
            })
        })
    }
}
