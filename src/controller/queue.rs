//! Keyed, de-duplicating work queue with delayed and rate-limited requeue.
//!
//! A key is handed to at most one worker at a time. Adding a key that is
//! already queued is a no-op; adding a key that is being processed marks it
//! dirty so it is requeued once the worker calls [`WorkQueue::done`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct State<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    processing: HashSet<K>,
    dirty: HashSet<K>,
    failures: HashMap<K, u32>,
    shut_down: bool,
}

impl<K: Clone + Eq + Hash> State<K> {
    fn push(&mut self, key: K) -> bool {
        if self.shut_down || self.queued.contains(&key) {
            return false;
        }
        if self.processing.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        self.queued.insert(key.clone());
        self.queue.push_back(key);
        true
    }
}

struct Inner<K> {
    name: &'static str,
    state: Mutex<State<K>>,
    notify: Notify,
    backoff_base: Duration,
    backoff_max: Duration,
    cancel: CancellationToken,
}

/// Shared handle to a work queue. Clones refer to the same queue.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    /// Create a queue whose rate-limited requeues back off from
    /// `backoff_base`, doubling per consecutive failure up to `backoff_max`.
    ///
    /// Cancelling `cancel` shuts the queue down.
    #[must_use]
    pub fn new(
        name: &'static str,
        backoff_base: Duration,
        backoff_max: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    queued: HashSet::new(),
                    processing: HashSet::new(),
                    dirty: HashSet::new(),
                    failures: HashMap::new(),
                    shut_down: false,
                }),
                notify: Notify::new(),
                backoff_base,
                backoff_max,
                cancel,
            }),
        }
    }

    /// Enqueue `key` unless it is already waiting.
    pub async fn add(&self, key: K) {
        let pushed = self.inner.state.lock().await.push(key);
        if pushed {
            self.inner.notify.notify_one();
        }
    }

    /// Enqueue `key` once `delay` has elapsed.
    pub fn add_after(&self, key: K, delay: Duration) {
        let queue = self.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => queue.add(key).await,
            }
        });
    }

    /// Enqueue `key` after its per-key backoff delay and bump its failure
    /// count. Returns the delay used.
    pub async fn add_rate_limited(&self, key: K) -> Duration {
        let failures = {
            let mut state = self.inner.state.lock().await;
            let count = state.failures.entry(key.clone()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        let delay = self.backoff(failures);
        debug!(queue = self.inner.name, ?key, failures, ?delay, "requeue with backoff");
        self.add_after(key, delay);
        delay
    }

    /// Clear the failure history of `key`.
    pub async fn forget(&self, key: &K) {
        self.inner.state.lock().await.failures.remove(key);
    }

    /// Consecutive failures recorded for `key`.
    pub async fn failures(&self, key: &K) -> u32 {
        self.inner
            .state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the key until it calls [`done`](Self::done).
    pub async fn next(&self) -> Option<K> {
        loop {
            // Registered before the state check so a shutdown in between is not missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.inner.state.lock().await;
                if state.shut_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            tokio::select! {
                () = self.inner.cancel.cancelled() => {
                    self.shutdown().await;
                    return None;
                }
                () = &mut notified => {}
            }
        }
    }

    /// Release `key`, requeueing it if it was added while processing.
    pub async fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.inner.state.lock().await;
            state.processing.remove(key);
            if state.dirty.remove(key) {
                state.push(key.clone())
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker.
    pub async fn shutdown(&self) {
        self.inner.state.lock().await.shut_down = true;
        self.inner.notify.notify_waiters();
    }

    /// Number of keys waiting to be handed out.
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// Whether no key is waiting.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.inner
            .backoff_base
            .saturating_mul(1_u32 << exponent)
            .min(self.inner.backoff_max)
    }
}
