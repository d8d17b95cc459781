//! Reconciliation controller.
//!
//! Change events feed two keyed work queues: one of policy names and one of
//! request keys. A fixed pool of workers drains each queue through its
//! reconciler. Retryable failures requeue the key with exponential backoff;
//! non-retryable ones are logged and dropped until the next change event.

pub mod events;
pub mod policy_reconciler;
pub mod queue;
pub mod request_reconciler;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ControllerConfig;
use crate::engine::combiner::DecisionCombiner;
use crate::models::request::RequestKey;
use crate::persistence::Store;

use self::events::{Dispatcher, EventSender, WatchEvent};
use self::policy_reconciler::PolicyReconciler;
use self::queue::WorkQueue;
use self::request_reconciler::RequestReconciler;

/// Owns the queues, reconcilers, and event channel until started.
pub struct Controller {
    config: ControllerConfig,
    policy_queue: WorkQueue<String>,
    request_queue: WorkQueue<RequestKey>,
    policies: PolicyReconciler,
    requests: RequestReconciler,
    dispatcher: Dispatcher,
    events_tx: EventSender,
    events_rx: mpsc::Receiver<WatchEvent>,
    cancel: CancellationToken,
}

impl Controller {
    /// Assemble a controller. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        combiner: DecisionCombiner,
        config: ControllerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = events::channel();
        let policy_queue = WorkQueue::new(
            "policies",
            config.backoff_base(),
            config.backoff_max(),
            cancel.clone(),
        );
        let request_queue = WorkQueue::new(
            "requests",
            config.backoff_base(),
            config.backoff_max(),
            cancel.clone(),
        );

        let policies = PolicyReconciler::new(
            Arc::clone(&store),
            Arc::clone(combiner.registry()),
            events_tx.clone(),
            config.reconcile_timeout(),
        );
        let requests =
            RequestReconciler::new(Arc::clone(&store), combiner, config.reconcile_timeout());
        let dispatcher = Dispatcher::new(store, policy_queue.clone(), request_queue.clone())
            .with_retry(config.backoff_base(), config.backoff_max());

        Self {
            config,
            policy_queue,
            request_queue,
            policies,
            requests,
            dispatcher,
            events_tx,
            events_rx,
            cancel,
        }
    }

    /// Sender for change notifications from watchers and the API.
    #[must_use]
    pub fn events(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// Enqueue every known object, then spawn the dispatcher and workers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the initial resync cannot list the store.
    pub async fn start(self) -> crate::Result<ControllerHandle> {
        self.dispatcher.resync().await?;

        let workers = self.config.policy_workers + self.config.request_workers;
        let mut tasks = Vec::with_capacity(workers + 1);
        tasks.push(self.dispatcher.spawn(self.events_rx, self.cancel.clone()));

        for id in 0..self.config.policy_workers {
            tasks.push(tokio::spawn(
                policy_worker(
                    self.policy_queue.clone(),
                    self.policies.clone(),
                    self.cancel.clone(),
                )
                .instrument(info_span!("policy_worker", id)),
            ));
        }
        for id in 0..self.config.request_workers {
            tasks.push(tokio::spawn(
                request_worker(
                    self.request_queue.clone(),
                    self.requests.clone(),
                    self.cancel.clone(),
                )
                .instrument(info_span!("request_worker", id)),
            ));
        }

        info!(
            policy_workers = self.config.policy_workers,
            request_workers = self.config.request_workers,
            "controller started"
        );

        Ok(ControllerHandle {
            tasks,
            events: self.events_tx,
            cancel: self.cancel,
        })
    }
}

/// Running controller.
pub struct ControllerHandle {
    tasks: Vec<JoinHandle<()>>,
    events: EventSender,
    cancel: CancellationToken,
}

impl ControllerHandle {
    /// Sender for change notifications.
    #[must_use]
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    /// Cancel every worker and wait for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(%err, "controller task panicked");
            }
        }
        info!("controller stopped");
    }
}

async fn policy_worker(
    queue: WorkQueue<String>,
    reconciler: PolicyReconciler,
    cancel: CancellationToken,
) {
    while let Some(name) = queue.next().await {
        match reconciler.reconcile(&name, &cancel).await {
            Ok(recheck) => {
                queue.forget(&name).await;
                if let Some(delay) = recheck {
                    debug!(policy = %name, ?delay, "readiness recheck scheduled");
                    queue.add_after(name.clone(), delay);
                }
            }
            Err(err) if err.is_retryable() => {
                let delay = queue.add_rate_limited(name.clone()).await;
                warn!(policy = %name, %err, ?delay, "policy reconcile failed, retrying");
            }
            Err(err) => {
                queue.forget(&name).await;
                error!(policy = %name, %err, "policy reconcile failed");
            }
        }
        queue.done(&name).await;
    }
}

async fn request_worker(
    queue: WorkQueue<RequestKey>,
    reconciler: RequestReconciler,
    cancel: CancellationToken,
) {
    while let Some(key) = queue.next().await {
        match reconciler.reconcile(&key, &cancel).await {
            Ok(_) => queue.forget(&key).await,
            Err(err) if err.is_retryable() => {
                let delay = queue.add_rate_limited(key.clone()).await;
                warn!(request = %key, %err, ?delay, "request reconcile failed, retrying");
            }
            Err(err) => {
                queue.forget(&key).await;
                error!(
                    request = %key,
                    %err,
                    "request cannot be decided until its policies change"
                );
            }
        }
        queue.done(&key).await;
    }
}
