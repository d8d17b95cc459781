//! Unit tests for the controller work queue.

use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use approver_policy::controller::queue::WorkQueue;

fn queue(cancel: CancellationToken) -> WorkQueue<String> {
    WorkQueue::new(
        "test",
        Duration::from_millis(10),
        Duration::from_millis(80),
        cancel,
    )
}

async fn next_within(q: &WorkQueue<String>, wait: Duration) -> Option<String> {
    timeout(wait, q.next()).await.ok().flatten()
}

#[tokio::test]
async fn keys_are_handed_out_in_order() {
    let q = queue(CancellationToken::new());
    q.add("a".into()).await;
    q.add("b".into()).await;
    q.add("a".into()).await;
    assert_eq!(q.len().await, 2);

    assert_eq!(q.next().await.as_deref(), Some("a"));
    assert_eq!(q.next().await.as_deref(), Some("b"));
    assert!(q.is_empty().await);
}

#[tokio::test]
async fn key_added_while_processing_is_requeued_on_done() {
    let q = queue(CancellationToken::new());
    q.add("a".into()).await;
    let key = q.next().await.expect("key");

    q.add("a".into()).await;
    assert!(q.is_empty().await, "in-flight key must not be queued twice");

    q.done(&key).await;
    assert_eq!(q.len().await, 1);
    assert_eq!(q.next().await.as_deref(), Some("a"));
}

#[tokio::test]
async fn done_without_re_add_does_not_requeue() {
    let q = queue(CancellationToken::new());
    q.add("a".into()).await;
    let key = q.next().await.expect("key");
    q.done(&key).await;
    assert!(q.is_empty().await);
}

#[tokio::test]
async fn waiting_worker_is_woken_by_add() {
    let q = queue(CancellationToken::new());
    let worker = {
        let q = q.clone();
        tokio::spawn(async move { q.next().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    q.add("late".into()).await;
    let got = timeout(Duration::from_secs(1), worker)
        .await
        .expect("woken")
        .expect("join");
    assert_eq!(got.as_deref(), Some("late"));
}

#[tokio::test]
async fn add_after_delays_delivery() {
    let q = queue(CancellationToken::new());
    q.add_after("a".into(), Duration::from_millis(50));
    assert!(next_within(&q, Duration::from_millis(10)).await.is_none());
    assert_eq!(
        next_within(&q, Duration::from_secs(1)).await.as_deref(),
        Some("a")
    );
}

#[tokio::test]
async fn rate_limited_requeue_backs_off_until_forgotten() {
    let q = queue(CancellationToken::new());
    let key = "a".to_owned();

    assert_eq!(q.add_rate_limited(key.clone()).await, Duration::from_millis(10));
    assert_eq!(q.add_rate_limited(key.clone()).await, Duration::from_millis(20));
    assert_eq!(q.add_rate_limited(key.clone()).await, Duration::from_millis(40));
    assert_eq!(q.add_rate_limited(key.clone()).await, Duration::from_millis(80));
    assert_eq!(q.add_rate_limited(key.clone()).await, Duration::from_millis(80));
    assert_eq!(q.failures(&key).await, 5);

    q.forget(&key).await;
    assert_eq!(q.failures(&key).await, 0);
    assert_eq!(q.add_rate_limited(key.clone()).await, Duration::from_millis(10));

    assert_eq!(
        next_within(&q, Duration::from_secs(1)).await.as_deref(),
        Some("a")
    );
}

#[tokio::test]
async fn shutdown_releases_waiting_workers() {
    let q = queue(CancellationToken::new());
    let worker = {
        let q = q.clone();
        tokio::spawn(async move { q.next().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    q.shutdown().await;
    let got = timeout(Duration::from_secs(1), worker)
        .await
        .expect("released")
        .expect("join");
    assert!(got.is_none());

    q.add("ignored".into()).await;
    assert!(q.is_empty().await);
}

#[tokio::test]
async fn cancellation_shuts_the_queue_down() {
    let cancel = CancellationToken::new();
    let q = queue(cancel.clone());
    q.add("a".into()).await;
    cancel.cancel();

    let _ = q.next().await;
    assert!(q.next().await.is_none());
}
