//! Change notifications and their mapping onto work queues.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::queue::WorkQueue;
use crate::models::request::RequestKey;
use crate::persistence::Store;
use crate::Result;

/// Buffer size of the event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// First delay before a failed dispatch is retried.
const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(10);

/// Longest delay between dispatch retries.
const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(5);

/// Something the engine's decisions depend on has changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A policy was created or its spec changed.
    PolicyChanged(String),
    /// A policy was removed.
    PolicyDeleted(String),
    /// A policy's published readiness changed.
    PolicyStatusChanged(String),
    /// A namespace was created, relabeled, or removed.
    NamespaceChanged(String),
    /// The set of role bindings changed.
    BindingsChanged,
    /// A new request was submitted.
    RequestCreated(RequestKey),
}

/// Sending half of the event channel.
pub type EventSender = mpsc::Sender<WatchEvent>;

/// Create the event channel.
#[must_use]
pub fn channel() -> (EventSender, mpsc::Receiver<WatchEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Translates [`WatchEvent`]s into queue keys.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn Store>,
    policies: WorkQueue<String>,
    requests: WorkQueue<RequestKey>,
    retry_base: Duration,
    retry_max: Duration,
}

impl Dispatcher {
    /// Build a dispatcher feeding the given queues.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        policies: WorkQueue<String>,
        requests: WorkQueue<RequestKey>,
    ) -> Self {
        Self {
            store,
            policies,
            requests,
            retry_base: DEFAULT_RETRY_BASE,
            retry_max: DEFAULT_RETRY_MAX,
        }
    }

    /// Backoff applied when a dispatch fails with a retryable error.
    #[must_use]
    pub fn with_retry(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base = base;
        self.retry_max = max;
        self
    }

    /// Enqueue everything affected by `event`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the pending requests cannot be listed.
    pub async fn dispatch(&self, event: WatchEvent) -> Result<()> {
        debug!(?event, "dispatching event");
        match event {
            WatchEvent::PolicyChanged(name) => {
                self.policies.add(name).await;
                self.enqueue_pending(None).await
            }
            WatchEvent::PolicyDeleted(_)
            | WatchEvent::PolicyStatusChanged(_)
            | WatchEvent::BindingsChanged => self.enqueue_pending(None).await,
            WatchEvent::NamespaceChanged(namespace) => {
                self.enqueue_pending(Some(&namespace)).await
            }
            WatchEvent::RequestCreated(key) => {
                self.requests.add(key).await;
                Ok(())
            }
        }
    }

    /// Dispatch `event`, retrying retryable failures with exponential
    /// backoff until it succeeds. Non-retryable failures drop the event.
    ///
    /// Returns `false` if `cancel` fired before the event was dispatched.
    pub async fn dispatch_with_retry(&self, event: WatchEvent, cancel: &CancellationToken) -> bool {
        let mut delay = self.retry_base;
        loop {
            match self.dispatch(event.clone()).await {
                Ok(()) => return true,
                Err(err) if err.is_retryable() => {
                    warn!(?event, %err, ?delay, "failed to dispatch event, retrying");
                    tokio::select! {
                        () = cancel.cancelled() => return false,
                        () = tokio::time::sleep(delay) => {}
                    }
                    delay = delay.saturating_mul(2).min(self.retry_max);
                }
                Err(err) => {
                    error!(?event, %err, "failed to dispatch event, dropping it");
                    return true;
                }
            }
        }
    }

    /// Enqueue every policy and every pending request.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be listed.
    pub async fn resync(&self) -> Result<()> {
        for policy in self.store.list_policies().await? {
            self.policies.add(policy.name).await;
        }
        self.enqueue_pending(None).await
    }

    async fn enqueue_pending(&self, namespace: Option<&str>) -> Result<()> {
        for key in self.store.list_pending_requests(namespace).await? {
            self.requests.add(key).await;
        }
        Ok(())
    }

    /// Consume events until the channel closes or `cancel` fires.
    #[must_use]
    pub fn spawn(
        self,
        mut events: mpsc::Receiver<WatchEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(
            async move {
                loop {
                    let event = tokio::select! {
                        () = cancel.cancelled() => break,
                        event = events.recv() => event,
                    };
                    let Some(event) = event else {
                        break;
                    };
                    if !self.dispatch_with_retry(event, &cancel).await {
                        break;
                    }
                }
                info!("event dispatcher shutting down");
            }
            .instrument(info_span!("dispatcher")),
        )
    }
}
