//! Manifest directory sync and hot reload.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use approver_policy::approver::registry::Registry;
use approver_policy::authz::rbac::RbacAuthorizer;
use approver_policy::authz::{AccessDecision, Authorizer};
use approver_policy::controller::events::{self, WatchEvent, EVENT_CHANNEL_CAPACITY};
use approver_policy::persistence::memory::MemoryStore;
use approver_policy::persistence::Store;
use approver_policy::policy::watcher::ManifestWatcher;
use approver_policy::AppError;

use super::harness::{eventually, Harness, CONVERGE};
use super::test_helpers::{ready_status, requester};

const POLICY_P: &str = r#"{"kind": "Policy", "name": "p", "spec": {}}"#;
const POLICY_Q: &str =
    r#"{"kind": "Policy", "name": "q", "spec": {"selector": {"issuer_ref": {"kind": "Issuer"}}}}"#;
const NAMESPACE: &str = r#"{"kind": "Namespace", "name": "ns", "labels": {"env": "prod"}}"#;
const BINDING: &str = r#"{"kind": "RoleBinding", "name": "b", "policies": ["*"],
    "subjects": [{"kind": "User", "name": "alice"}]}"#;

struct Fixture {
    dir: tempfile::TempDir,
    store: Arc<dyn Store>,
    authorizer: Arc<RbacAuthorizer>,
    watcher: ManifestWatcher,
    rx: mpsc::Receiver<WatchEvent>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let authorizer = Arc::new(RbacAuthorizer::new());
    let (tx, rx) = events::channel();
    let watcher = ManifestWatcher::new(dir.path(), Arc::clone(&store), authorizer.clone(), tx);
    Fixture {
        dir,
        store,
        authorizer,
        watcher,
        rx,
    }
}

fn write(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).expect("write manifest");
}

fn drain(rx: &mut mpsc::Receiver<WatchEvent>) -> Vec<WatchEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn initial_sync_loads_everything_and_publishes_events() {
    let mut f = fixture();
    write(f.dir.path(), "policies.json", &format!("[{POLICY_P}, {POLICY_Q}]"));
    write(f.dir.path(), "ns.json", NAMESPACE);
    write(f.dir.path(), "rbac.json", BINDING);

    let report = f.watcher.sync().await.expect("sync");
    assert_eq!(report.policies_changed, ["p", "q"]);
    assert_eq!(report.namespaces_changed, ["ns"]);
    assert!(report.bindings_changed);

    assert_eq!(f.store.list_policies().await.expect("list").len(), 2);
    assert_eq!(f.authorizer.bindings().await.len(), 1);
    let decision = f
        .authorizer
        .check_use(&requester(), "p", "ns")
        .await
        .expect("check");
    assert_eq!(decision, AccessDecision::Allowed);

    assert_eq!(
        drain(&mut f.rx),
        vec![
            WatchEvent::PolicyChanged("p".into()),
            WatchEvent::PolicyChanged("q".into()),
            WatchEvent::NamespaceChanged("ns".into()),
            WatchEvent::BindingsChanged,
        ]
    );
}

#[tokio::test]
async fn unchanged_directory_is_a_quiet_sync() {
    let mut f = fixture();
    write(f.dir.path(), "all.json", &format!("[{POLICY_P}, {NAMESPACE}, {BINDING}]"));
    f.watcher.sync().await.expect("first sync");
    drain(&mut f.rx);

    let report = f.watcher.sync().await.expect("second sync");
    assert!(report.is_empty(), "{report:?}");
    assert!(drain(&mut f.rx).is_empty());
}

#[tokio::test]
async fn removed_manifests_are_deleted() {
    let mut f = fixture();
    write(f.dir.path(), "p.json", POLICY_P);
    write(f.dir.path(), "q.json", POLICY_Q);
    write(f.dir.path(), "ns.json", NAMESPACE);
    f.watcher.sync().await.expect("first sync");
    drain(&mut f.rx);

    fs::remove_file(f.dir.path().join("q.json")).expect("remove");
    fs::remove_file(f.dir.path().join("ns.json")).expect("remove");
    let report = f.watcher.sync().await.expect("second sync");
    assert_eq!(report.policies_deleted, ["q"]);
    assert_eq!(report.namespaces_changed, ["ns"]);
    assert!(f.store.get_policy("q").await.expect("get").is_none());
    assert!(f.store.get_namespace("ns").await.expect("get").is_none());
    assert_eq!(
        drain(&mut f.rx),
        vec![
            WatchEvent::PolicyDeleted("q".into()),
            WatchEvent::NamespaceChanged("ns".into()),
        ]
    );
}

#[tokio::test]
async fn resync_keeps_published_status() {
    let f = fixture();
    write(f.dir.path(), "p.json", POLICY_P);
    f.watcher.sync().await.expect("first sync");
    f.store
        .update_policy_status("p", &ready_status())
        .await
        .expect("status");

    write(
        f.dir.path(),
        "p.json",
        r#"{"kind": "Policy", "name": "p", "spec": {"plugins": {"extra": {}}}}"#,
    );
    let report = f.watcher.sync().await.expect("second sync");
    assert_eq!(report.policies_changed, ["p"]);

    let stored = f.store.get_policy("p").await.expect("get").expect("policy");
    assert!(stored.spec.plugins.contains_key("extra"));
    assert!(stored.status.ready.as_ref().is_some_and(|c| c.ready), "status is kept");
    assert!(!stored.is_ready(), "edited spec must be re-aggregated");
}

#[tokio::test]
async fn broken_file_does_not_disturb_the_rest() {
    let f = fixture();
    write(f.dir.path(), "good.json", POLICY_P);
    write(f.dir.path(), "bad.json", r#"[{"kind": "Policy", "name": "x", "spec": 7}]"#);

    let report = f.watcher.sync().await.expect("sync");
    assert_eq!(report.policies_changed, ["p"]);
    assert!(f.store.get_policy("x").await.expect("get").is_none());
}

#[tokio::test]
async fn half_written_file_keeps_its_previous_objects() {
    let mut f = fixture();
    write(f.dir.path(), "all.json", &format!("[{POLICY_P}, {NAMESPACE}]"));
    f.watcher.sync().await.expect("first sync");
    f.store
        .update_policy_status("p", &ready_status())
        .await
        .expect("status");
    drain(&mut f.rx);

    write(f.dir.path(), "all.json", r#"[{"kind": "Policy", "name": "p", "sp"#);
    let report = f.watcher.sync().await.expect("second sync");
    assert!(report.is_empty(), "{report:?}");
    assert!(f.store.get_policy("p").await.expect("get").is_some_and(|p| p.is_ready()));
    assert!(f.store.get_namespace("ns").await.expect("get").is_some());
    assert!(drain(&mut f.rx).is_empty());

    write(f.dir.path(), "all.json", &format!("[{NAMESPACE}]"));
    let report = f.watcher.sync().await.expect("third sync");
    assert_eq!(report.policies_deleted, ["p"]);
}

#[tokio::test]
async fn missing_directory_leaves_the_store_untouched() {
    let f = fixture();
    write(f.dir.path(), "p.json", POLICY_P);
    f.watcher.sync().await.expect("first sync");

    let Fixture { dir, store, watcher, .. } = f;
    dir.close().expect("remove dir");
    let err = watcher.sync().await.expect_err("directory is gone");
    assert!(matches!(err, AppError::NotFound(_)), "{err:?}");
    assert!(store.get_policy("p").await.expect("get").is_some());
}

#[tokio::test]
async fn file_changes_are_picked_up_while_running() {
    let f = fixture();
    f.watcher.sync().await.expect("initial sync");
    let store = Arc::clone(&f.store);
    let dir = f.dir.path().to_path_buf();
    let cancel = CancellationToken::new();
    let handle = f.watcher.clone().spawn(cancel.clone()).expect("spawn watcher");

    write(&dir, "p.json", POLICY_P);
    let watched_store = Arc::clone(&store);
    let loaded = eventually(CONVERGE, move || {
        let store = Arc::clone(&watched_store);
        async move { store.get_policy("p").await.expect("get") }
    })
    .await;
    assert!(loaded.is_some(), "new manifest was not loaded");

    fs::remove_file(dir.join("p.json")).expect("remove");
    let watched_store = Arc::clone(&store);
    let removed = eventually(CONVERGE, move || {
        let store = Arc::clone(&watched_store);
        async move {
            let gone = store.get_policy("p").await.expect("get").is_none();
            gone.then_some(())
        }
    })
    .await;
    assert!(removed.is_some(), "deleted manifest was not unloaded");

    cancel.cancel();
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("watcher stops")
        .expect("join");
}

#[tokio::test]
async fn initial_sync_larger_than_the_event_buffer_completes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let count = EVENT_CHANNEL_CAPACITY + 44;
    let namespaces: Vec<String> = (0..count)
        .map(|i| format!(r#"{{"kind": "Namespace", "name": "ns-{i}"}}"#))
        .collect();
    write(dir.path(), "namespaces.json", &format!("[{}]", namespaces.join(",")));

    // Same order as the binary: controller first, then the initial sync.
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let h = Harness::start(
        Arc::clone(&store),
        Registry::with_builtins(),
        RbacAuthorizer::new(),
    )
    .await;
    let watcher = ManifestWatcher::new(dir.path(), store, h.authorizer.clone(), h.events.clone());

    let report = timeout(CONVERGE, watcher.sync())
        .await
        .expect("sync finishes")
        .expect("sync");
    assert_eq!(report.namespaces_changed.len(), count);

    h.shutdown().await;
}
