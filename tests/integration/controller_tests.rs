//! End-to-end reconciliation through a running controller.

use std::sync::Arc;
use std::time::Duration;

use approver_policy::approver::registry::Registry;
use approver_policy::authz::rbac::RbacAuthorizer;
use approver_policy::controller::events::WatchEvent;
use approver_policy::models::policy::{
    AllowedSpec, AllowedStringSlice, ConstraintsSpec, LabelSelector, NamespaceSelector, Policy,
};
use approver_policy::models::request::{Decision, RequestKey, OUTCOME_REASON};
use approver_policy::models::verdict::ReadinessVerdict;
use approver_policy::persistence::memory::MemoryStore;
use approver_policy::persistence::sqlite_store::SqliteStore;
use approver_policy::persistence::{db, Store};

use super::harness::{eventually, Harness, CONVERGE, SETTLE};
use super::test_helpers::{
    allow_all, allow_all_binding, namespace, policy, request, with_plugin, StubApprover,
};

async fn seeded_store(policies: &[Policy]) -> Arc<dyn Store> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    seed(&store, policies).await;
    store
}

async fn seed(store: &Arc<dyn Store>, policies: &[Policy]) {
    store.upsert_namespace(&namespace("ns")).await.expect("namespace");
    for p in policies {
        store.upsert_policy(p).await.expect("policy");
    }
}

fn dns_policy(name: &str, pattern: &str) -> Policy {
    let mut p = policy(name);
    p.spec.allowed = Some(AllowedSpec {
        dns_names: Some(AllowedStringSlice {
            values: vec![pattern.into()],
            required: false,
        }),
        ..AllowedSpec::default()
    });
    p
}

#[tokio::test]
async fn request_is_approved_once_policy_is_ready() {
    let store = seeded_store(&[policy("p")]).await;
    let h = Harness::start(store, Registry::with_builtins(), allow_all()).await;
    h.wait_for_ready("p").await;

    let key = h.submit(&request("ns", "cr")).await;
    let outcome = h.wait_for_outcome(&key).await;
    assert_eq!(outcome.decision, Decision::Approved);
    assert_eq!(outcome.reason, OUTCOME_REASON);
    assert_eq!(outcome.message, "Approved by CertificateRequestPolicy: \"p\"");

    h.shutdown().await;
}

#[tokio::test]
async fn request_submitted_before_readiness_is_approved_later() {
    let store = seeded_store(&[policy("p")]).await;
    store.create_request(&request("ns", "early")).await.expect("create");

    let h = Harness::start(store, Registry::with_builtins(), allow_all()).await;
    let outcome = h.wait_for_outcome(&RequestKey::new("ns", "early")).await;
    assert_eq!(outcome.decision, Decision::Approved);

    h.shutdown().await;
}

#[tokio::test]
async fn disallowed_dns_name_is_denied() {
    let store = seeded_store(&[dns_policy("dns", "*.example.com")]).await;
    let h = Harness::start(store, Registry::with_builtins(), allow_all()).await;
    h.wait_for_ready("dns").await;

    let mut cr = request("ns", "cr");
    cr.attributes.dns_names = vec!["evil.test".into()];
    let key = h.submit(&cr).await;

    let outcome = h.wait_for_outcome(&key).await;
    assert_eq!(outcome.decision, Decision::Denied);
    assert!(
        outcome
            .message
            .starts_with("Denied by CertificateRequestPolicy \"dns\": allowed: "),
        "{}",
        outcome.message
    );

    h.shutdown().await;
}

#[tokio::test]
async fn readiness_recheck_unblocks_pending_request() {
    let stub = Arc::new(StubApprover::new("stub"));
    stub.set_readiness(
        ReadinessVerdict::not_ready("warming up").recheck_after(Duration::from_millis(50)),
    );
    let registry = Registry::with_builtins().with_plugin(stub.clone());
    let store = seeded_store(&[with_plugin(policy("p"), "stub")]).await;
    let h = Harness::start(store, registry, allow_all()).await;

    let key = h.submit(&request("ns", "cr")).await;
    h.assert_stays_pending(&key).await;
    let published = h.store.get_policy("p").await.expect("get").expect("policy");
    let condition = published.status.ready.expect("status published");
    assert!(!condition.ready);
    assert_eq!(condition.message, "stub: warming up");

    stub.set_readiness(ReadinessVerdict::ready());
    let outcome = h.wait_for_outcome(&key).await;
    assert_eq!(outcome.decision, Decision::Approved);
    assert_eq!(stub.evaluations(), 1);

    h.shutdown().await;
}

#[tokio::test]
async fn binding_change_unblocks_unauthorized_request() {
    let store = seeded_store(&[policy("p")]).await;
    let h = Harness::start(store, Registry::with_builtins(), RbacAuthorizer::new()).await;
    h.wait_for_ready("p").await;

    let key = h.submit(&request("ns", "cr")).await;
    h.assert_stays_pending(&key).await;

    assert!(h.authorizer.replace(vec![allow_all_binding()]).await);
    h.send(WatchEvent::BindingsChanged).await;

    let outcome = h.wait_for_outcome(&key).await;
    assert_eq!(outcome.decision, Decision::Approved);

    h.shutdown().await;
}

#[tokio::test]
async fn namespace_relabel_brings_request_into_scope() {
    let mut p = policy("prod-only");
    p.spec.selector.namespace = Some(NamespaceSelector {
        match_names: Vec::new(),
        label_selector: Some(LabelSelector {
            match_labels: [("env".to_owned(), "prod".to_owned())].into(),
            match_expressions: Vec::new(),
        }),
    });
    let store = seeded_store(&[p]).await;
    let h = Harness::start(store, Registry::with_builtins(), allow_all()).await;
    h.wait_for_ready("prod-only").await;

    let key = h.submit(&request("ns", "cr")).await;
    h.assert_stays_pending(&key).await;

    h.store
        .upsert_namespace(&namespace("ns").with_label("env", "prod"))
        .await
        .expect("relabel");
    h.send(WatchEvent::NamespaceChanged("ns".into())).await;

    let outcome = h.wait_for_outcome(&key).await;
    assert_eq!(outcome.decision, Decision::Approved);

    h.shutdown().await;
}

#[tokio::test]
async fn missing_namespace_is_retried_until_it_appears() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    store.upsert_policy(&policy("p")).await.expect("policy");
    let h = Harness::start(store, Registry::with_builtins(), allow_all()).await;
    h.wait_for_ready("p").await;

    let key = h.submit(&request("late-ns", "cr")).await;
    h.assert_stays_pending(&key).await;

    h.store
        .upsert_namespace(&namespace("late-ns"))
        .await
        .expect("namespace");
    let outcome = h.wait_for_outcome(&key).await;
    assert_eq!(outcome.decision, Decision::Approved);

    h.shutdown().await;
}

#[tokio::test]
async fn decided_request_is_never_revisited() {
    let stub = Arc::new(StubApprover::new("stub"));
    let registry = Registry::with_builtins().with_plugin(stub.clone());
    let store = seeded_store(&[with_plugin(policy("p"), "stub")]).await;
    let h = Harness::start(store, registry, allow_all()).await;
    h.wait_for_ready("p").await;

    let key = h.submit(&request("ns", "cr")).await;
    let first = h.wait_for_outcome(&key).await;
    assert_eq!(stub.evaluations(), 1);

    h.send(WatchEvent::RequestCreated(key.clone())).await;
    h.send(WatchEvent::PolicyChanged("p".into())).await;
    h.send(WatchEvent::BindingsChanged).await;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(stub.evaluations(), 1);
    assert_eq!(h.outcome(&key).await, Some(first));

    h.shutdown().await;
}

#[tokio::test]
async fn policy_edit_is_republished() {
    let store = seeded_store(&[policy("p")]).await;
    let h = Harness::start(store, Registry::with_builtins(), allow_all()).await;
    h.wait_for_ready("p").await;

    let mut broken = policy("p");
    broken.spec.constraints = Some(ConstraintsSpec {
        min_duration_seconds: Some(10),
        max_duration_seconds: Some(1),
        private_key: None,
    });
    assert!(h.store.upsert_policy(&broken).await.expect("update"));
    h.send(WatchEvent::PolicyChanged("p".into())).await;

    let store = Arc::clone(&h.store);
    let unready = eventually(CONVERGE, move || {
        let store = Arc::clone(&store);
        async move {
            store
                .get_policy("p")
                .await
                .expect("get")
                .filter(|p| !p.is_ready())
        }
    })
    .await;
    assert!(unready.is_some(), "edited policy should become unready");

    let key = h.submit(&request("ns", "cr")).await;
    h.assert_stays_pending(&key).await;

    h.shutdown().await;
}

#[tokio::test]
async fn sqlite_backed_controller_commits_outcomes() {
    let pool = db::connect_memory().await.expect("sqlite");
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(Arc::new(pool)));
    seed(&store, &[dns_policy("dns", "*.example.com")]).await;
    let h = Harness::start(store, Registry::with_builtins(), allow_all()).await;
    h.wait_for_ready("dns").await;

    let mut ok = request("ns", "ok");
    ok.attributes.dns_names = vec!["www.example.com".into()];
    let mut bad = request("ns", "bad");
    bad.attributes.dns_names = vec!["www.example.org".into()];
    let ok = h.submit(&ok).await;
    let bad = h.submit(&bad).await;

    assert_eq!(h.wait_for_outcome(&ok).await.decision, Decision::Approved);
    assert_eq!(h.wait_for_outcome(&bad).await.decision, Decision::Denied);
    assert!(h
        .store
        .list_pending_requests(None)
        .await
        .expect("list")
        .is_empty());

    h.shutdown().await;
}
