//! Built-in approver enforcing duration and private key bounds.

use std::future::ready;

use super::{Approver, ApproverFuture};
use crate::models::policy::{ConstraintsSpec, Policy};
use crate::models::request::{CertificateRequest, RequestAttributes};
use crate::models::verdict::{EvaluationVerdict, ReadinessVerdict};

/// Denies requests outside the policy's duration and key constraints.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintsApprover;

impl ConstraintsApprover {
    /// Registry key.
    pub const NAME: &'static str = "constraints";
}

impl Approver for ConstraintsApprover {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn ready<'a>(&'a self, policy: &'a Policy) -> ApproverFuture<'a, ReadinessVerdict> {
        let verdict = match policy.spec.constraints.as_ref().and_then(inconsistency) {
            Some(msg) => ReadinessVerdict::not_ready(msg),
            None => ReadinessVerdict::ready(),
        };
        Box::pin(ready(Ok(verdict)))
    }

    fn evaluate<'a>(
        &'a self,
        policy: &'a Policy,
        request: &'a CertificateRequest,
    ) -> ApproverFuture<'a, EvaluationVerdict> {
        let verdict = match policy.spec.constraints.as_ref() {
            None => EvaluationVerdict::NotDenied,
            Some(spec) => {
                let violations = violations(spec, &request.attributes);
                if violations.is_empty() {
                    EvaluationVerdict::NotDenied
                } else {
                    EvaluationVerdict::Denied(violations.join(", "))
                }
            }
        };
        Box::pin(ready(Ok(verdict)))
    }
}

/// A bound pair that can never be satisfied.
fn inconsistency(spec: &ConstraintsSpec) -> Option<String> {
    if let (Some(min), Some(max)) = (spec.min_duration_seconds, spec.max_duration_seconds) {
        if min > max {
            return Some(format!(
                "min_duration_seconds {min} exceeds max_duration_seconds {max}"
            ));
        }
    }
    let key = spec.private_key.as_ref()?;
    if let (Some(min), Some(max)) = (key.min_size, key.max_size) {
        if min > max {
            return Some(format!("private_key.min_size {min} exceeds max_size {max}"));
        }
    }
    None
}

/// Every way `attrs` breaks `spec`.
#[must_use]
pub fn violations(spec: &ConstraintsSpec, attrs: &RequestAttributes) -> Vec<String> {
    let mut out = Vec::new();

    if let Some(duration) = attrs.duration_seconds {
        if let Some(min) = spec.min_duration_seconds.filter(|min| duration < *min) {
            out.push(format!("duration: {duration}s is shorter than minimum {min}s"));
        }
        if let Some(max) = spec.max_duration_seconds.filter(|max| duration > *max) {
            out.push(format!("duration: {duration}s is longer than maximum {max}s"));
        }
    }

    if let Some(key) = spec.private_key.as_ref() {
        if let Some(required) = key.algorithm.as_deref() {
            match attrs.key_algorithm.as_deref() {
                Some(actual) if actual == required => {}
                actual => out.push(format!(
                    "private_key.algorithm: {actual:?} must be {required:?}"
                )),
            }
        }
        if let Some(size) = attrs.key_size {
            if let Some(min) = key.min_size.filter(|min| size < *min) {
                out.push(format!("private_key.size: {size} is smaller than minimum {min}"));
            }
            if let Some(max) = key.max_size.filter(|max| size > *max) {
                out.push(format!("private_key.size: {size} is larger than maximum {max}"));
            }
        } else if key.min_size.is_some() || key.max_size.is_some() {
            out.push("private_key.size: not present".to_owned());
        }
    }

    out
}
