//! Hot-reload watcher for the manifest directory.
//!
//! Every change under the directory triggers a full reload through
//! [`ManifestLoader`] followed by a [`ManifestWatcher::sync`] that makes the
//! store and authorizer match the directory and emits a [`WatchEvent`] for
//! each object that changed.
//!
//! A file that fails to parse (for example, one caught mid-write) keeps
//! contributing the objects from its last good parse. A missing directory
//! fails the sync and leaves the store untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::authz::rbac::RbacAuthorizer;
use crate::controller::events::{EventSender, WatchEvent};
use crate::persistence::Store;
use crate::policy::loader::{Manifest, ManifestLoader, ManifestSet};
use crate::{AppError, Result};

/// Quiet period that coalesces bursts of file events into one reload.
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Changes applied by one [`ManifestWatcher::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Policies created or whose spec changed.
    pub policies_changed: Vec<String>,
    /// Policies removed from the store.
    pub policies_deleted: Vec<String>,
    /// Namespaces created, relabeled, or removed.
    pub namespaces_changed: Vec<String>,
    /// Whether the role binding set changed.
    pub bindings_changed: bool,
}

impl SyncReport {
    /// Whether anything changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies_changed.is_empty()
            && self.policies_deleted.is_empty()
            && self.namespaces_changed.is_empty()
            && !self.bindings_changed
    }
}

/// Keeps the store and authorizer in step with a manifest directory.
#[derive(Clone)]
pub struct ManifestWatcher {
    dir: PathBuf,
    store: Arc<dyn Store>,
    authorizer: Arc<RbacAuthorizer>,
    events: EventSender,
    last_good: Arc<Mutex<BTreeMap<PathBuf, Vec<Manifest>>>>,
}

impl ManifestWatcher {
    /// Create a watcher over `dir`.
    #[must_use]
    pub fn new(
        dir: impl Into<PathBuf>,
        store: Arc<dyn Store>,
        authorizer: Arc<RbacAuthorizer>,
        events: EventSender,
    ) -> Self {
        Self {
            dir: dir.into(),
            store,
            authorizer,
            events,
            last_good: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Directory being watched.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reload the directory and apply the difference.
    ///
    /// Policy status already published in the store is preserved.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the directory is missing,
    /// `AppError::Io` if it cannot be listed, or a store error. Individual
    /// bad files are not reported.
    pub async fn sync(&self) -> Result<SyncReport> {
        let span = info_span!("manifest_sync", dir = %self.dir.display());
        async move {
            let set = self.load().await?;
            let mut report = SyncReport::default();

            for policy in set.policies.values() {
                if self.store.upsert_policy(policy).await? {
                    report.policies_changed.push(policy.name.clone());
                }
            }
            for existing in self.store.list_policies().await? {
                if !set.policies.contains_key(&existing.name)
                    && self.store.delete_policy(&existing.name).await?
                {
                    report.policies_deleted.push(existing.name);
                }
            }

            let mut namespaces = BTreeSet::new();
            for namespace in set.namespaces.values() {
                if self.store.upsert_namespace(namespace).await? {
                    namespaces.insert(namespace.name.clone());
                }
            }
            for existing in self.store.list_namespaces().await? {
                if !set.namespaces.contains_key(&existing.name)
                    && self.store.delete_namespace(&existing.name).await?
                {
                    namespaces.insert(existing.name);
                }
            }
            report.namespaces_changed = namespaces.into_iter().collect();

            report.bindings_changed = self.authorizer.replace(set.role_bindings()).await;

            self.publish(&report).await;
            if report.is_empty() {
                debug!("manifests unchanged");
            } else {
                info!(?report, "manifests synced");
            }
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Load the directory, substituting the last good parse of any file
    /// that fails.
    async fn load(&self) -> Result<ManifestSet> {
        let files = ManifestLoader::load_files(&self.dir)?;
        let mut last_good = self.last_good.lock().await;
        let mut current = BTreeMap::new();
        for (path, result) in files {
            match result {
                Ok(manifests) => {
                    current.insert(path, manifests);
                }
                Err(err) => match last_good.remove(&path) {
                    Some(previous) => {
                        warn!(path = %path.display(), %err, "keeping last good manifest file");
                        current.insert(path, previous);
                    }
                    None => warn!(path = %path.display(), %err, "skipping manifest file"),
                },
            }
        }
        *last_good = current;
        Ok(ManifestSet::from_files(
            last_good.iter().map(|(path, manifests)| (path.as_path(), manifests.as_slice())),
        ))
    }

    async fn publish(&self, report: &SyncReport) {
        let events = report
            .policies_changed
            .iter()
            .cloned()
            .map(WatchEvent::PolicyChanged)
            .chain(report.policies_deleted.iter().cloned().map(WatchEvent::PolicyDeleted))
            .chain(
                report
                    .namespaces_changed
                    .iter()
                    .cloned()
                    .map(WatchEvent::NamespaceChanged),
            )
            .chain(report.bindings_changed.then_some(WatchEvent::BindingsChanged));

        for event in events {
            if self.events.send(event).await.is_err() {
                warn!("event channel closed, dropping manifest events");
                return;
            }
        }
    }

    /// Start watching the directory. Each change triggers [`sync`](Self::sync).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Policy` if the file watcher cannot be created or
    /// the directory cannot be watched.
    pub fn spawn(self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        let (tx, mut rx) = mpsc::channel::<()>(1);

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_manifest_event(&event) => {
                    // A full channel already has a reload pending.
                    let _ = tx.try_send(());
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "file watcher error"),
            },
        )
        .map_err(|err| AppError::Policy(format!("failed to create watcher: {err}")))?;

        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|err| AppError::Policy(format!("failed to watch directory: {err}")))?;
        info!(dir = %self.dir.display(), "watching manifest directory");

        let span = info_span!("manifest_watcher", dir = %self.dir.display());
        Ok(tokio::spawn(
            async move {
                // Dropping the watcher stops notifications.
                let _watcher = watcher;
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        received = rx.recv() => {
                            if received.is_none() {
                                break;
                            }
                        }
                    }
                    tokio::time::sleep(DEBOUNCE).await;
                    while rx.try_recv().is_ok() {}

                    if let Err(err) = self.sync().await {
                        warn!(%err, "failed to reload manifests");
                    }
                }
                info!("manifest watcher shutting down");
            }
            .instrument(span),
        ))
    }
}

/// Whether a notify event touches a JSON manifest.
fn is_manifest_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.extension().is_some_and(|ext| ext == "json"))
}
