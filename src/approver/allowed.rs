//! Built-in approver that checks request attributes against the policy's
//! allow-list.

use std::future::ready;

use super::{Approver, ApproverFuture};
use crate::models::policy::{AllowedSpec, AllowedString, AllowedStringSlice, Policy};
use crate::models::request::{CertificateRequest, RequestAttributes};
use crate::models::verdict::{EvaluationVerdict, ReadinessVerdict};
use crate::policy::glob;

/// Denies any populated attribute the policy does not explicitly allow.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowedApprover;

impl AllowedApprover {
    /// Registry key.
    pub const NAME: &'static str = "allowed";
}

impl Approver for AllowedApprover {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn ready<'a>(&'a self, _policy: &'a Policy) -> ApproverFuture<'a, ReadinessVerdict> {
        Box::pin(ready(Ok(ReadinessVerdict::ready())))
    }

    fn evaluate<'a>(
        &'a self,
        policy: &'a Policy,
        request: &'a CertificateRequest,
    ) -> ApproverFuture<'a, EvaluationVerdict> {
        let empty = AllowedSpec::default();
        let spec = policy.spec.allowed.as_ref().unwrap_or(&empty);
        let violations = violations(spec, &request.attributes);
        let verdict = if violations.is_empty() {
            EvaluationVerdict::NotDenied
        } else {
            EvaluationVerdict::Denied(violations.join(", "))
        };
        Box::pin(ready(Ok(verdict)))
    }
}

/// Every way `attrs` exceeds `spec`, in a fixed field order.
#[must_use]
pub fn violations(spec: &AllowedSpec, attrs: &RequestAttributes) -> Vec<String> {
    let mut out = Vec::new();

    check_single(
        "common_name",
        spec.common_name.as_ref(),
        attrs.common_name.as_deref(),
        &mut out,
    );
    check_slice("dns_names", spec.dns_names.as_ref(), &attrs.dns_names, &mut out);
    check_slice("ip_addresses", spec.ip_addresses.as_ref(), &attrs.ip_addresses, &mut out);
    check_slice("uris", spec.uris.as_ref(), &attrs.uris, &mut out);
    check_slice(
        "email_addresses",
        spec.email_addresses.as_ref(),
        &attrs.email_addresses,
        &mut out,
    );

    if attrs.is_ca && spec.is_ca != Some(true) {
        out.push("is_ca: true is not allowed".to_owned());
    }

    if !attrs.usages.is_empty() {
        let allowed = spec.usages.as_deref().unwrap_or(&[]);
        let rejected: Vec<&str> = attrs
            .usages
            .iter()
            .filter(|u| !allowed.contains(*u))
            .map(String::as_str)
            .collect();
        if !rejected.is_empty() {
            out.push(format!("usages: {rejected:?} not allowed"));
        }
    }

    out
}

fn check_single(
    field: &str,
    rule: Option<&AllowedString>,
    value: Option<&str>,
    out: &mut Vec<String>,
) {
    match (value.filter(|v| !v.is_empty()), rule) {
        (None, Some(r)) if r.required => out.push(format!("{field}: required value not present")),
        (None, _) => {}
        (Some(v), Some(AllowedString {
            value: Some(pattern),
            ..
        })) if glob::matches(pattern, v) => {}
        (Some(v), _) => out.push(format!("{field}: {v:?} not allowed")),
    }
}

fn check_slice(
    field: &str,
    rule: Option<&AllowedStringSlice>,
    values: &[String],
    out: &mut Vec<String>,
) {
    if values.is_empty() {
        if rule.is_some_and(|r| r.required) {
            out.push(format!("{field}: required value not present"));
        }
        return;
    }
    let patterns = rule.map_or(&[][..], |r| r.values.as_slice());
    let rejected: Vec<&str> = values
        .iter()
        .filter(|v| !patterns.iter().any(|p| glob::matches(p, v)))
        .map(String::as_str)
        .collect();
    if !rejected.is_empty() {
        out.push(format!("{field}: {rejected:?} not allowed"));
    }
}
