//! Policy selector evaluation.
//!
//! Each dimension is an independent predicate; [`select`] ANDs them. All
//! functions are pure over their inputs.

use std::collections::BTreeMap;

use crate::models::namespace::Namespace;
use crate::models::policy::{
    IssuerRefSelector, LabelOperator, LabelSelector, LabelSelectorRequirement, NamespaceSelector,
    PolicySelector,
};
use crate::models::request::IssuerTarget;
use crate::policy::glob;

/// Whether a policy's selector covers a request's issuer and namespace.
#[must_use]
pub fn select(selector: &PolicySelector, issuer: &IssuerTarget, namespace: &Namespace) -> bool {
    issuer_ref_matches(selector.issuer_ref.as_ref(), issuer)
        && namespace_matches(selector.namespace.as_ref(), namespace)
}

/// Issuer dimension. An absent selector matches every issuer; unset fields
/// default to `*`.
#[must_use]
pub fn issuer_ref_matches(selector: Option<&IssuerRefSelector>, issuer: &IssuerTarget) -> bool {
    let Some(sel) = selector else {
        return true;
    };
    glob::matches_or_all(sel.name.as_deref(), &issuer.name)
        && glob::matches_or_all(sel.kind.as_deref(), &issuer.kind)
        && glob::matches_or_all(sel.group.as_deref(), &issuer.group)
}

/// Namespace dimension: name patterns AND label requirements.
#[must_use]
pub fn namespace_matches(selector: Option<&NamespaceSelector>, namespace: &Namespace) -> bool {
    let Some(sel) = selector else {
        return true;
    };
    namespace_name_matches(&sel.match_names, &namespace.name)
        && namespace_labels_match(sel.label_selector.as_ref(), &namespace.labels)
}

/// An empty pattern list matches every name; otherwise any pattern may match.
#[must_use]
pub fn namespace_name_matches(patterns: &[String], name: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| glob::matches(p, name))
}

/// An absent or empty label selector matches every label set.
#[must_use]
pub fn namespace_labels_match(
    selector: Option<&LabelSelector>,
    labels: &BTreeMap<String, String>,
) -> bool {
    let Some(sel) = selector else {
        return true;
    };
    sel.match_labels
        .iter()
        .all(|(k, v)| labels.get(k) == Some(v))
        && sel
            .match_expressions
            .iter()
            .all(|req| requirement_matches(req, labels))
}

fn requirement_matches(req: &LabelSelectorRequirement, labels: &BTreeMap<String, String>) -> bool {
    let value = labels.get(&req.key);
    match req.operator {
        LabelOperator::In => value.is_some_and(|v| req.values.contains(v)),
        LabelOperator::NotIn => !value.is_some_and(|v| req.values.contains(v)),
        LabelOperator::Exists => value.is_some(),
        LabelOperator::DoesNotExist => value.is_none(),
    }
}
