//! Queue behaviour across sessions on the in-memory coordination service.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use keeper_coordination::CoordinationError;
use keeper_coordination::DistributedQueue;
use keeper_session::SessionConnection;
use keeper_testing::DeterministicCoordinationService;
use keeper_testing::init_tracing;
use keeper_testing::test_config;
use keeper_types::Acl;

async fn queue(service: &DeterministicCoordinationService) -> DistributedQueue {
    let session = SessionConnection::connect(service, test_config()).await.unwrap();
    session.ensure_path_exists("/jobs", b"", &Acl::open_unsafe(), true).await.unwrap();
    DistributedQueue::new(session, "/jobs").await.unwrap()
}

#[tokio::test]
async fn test_consumer_skips_item_taken_by_another() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let producer = queue(&service).await;
    let consumer = queue(&service).await;
    producer.push(b"first").await.unwrap();
    producer.push(b"second").await.unwrap();

    // The head disappears between listing the items and reading it.
    service.delete_before("get", "/jobs/item-0000000000");

    assert_eq!(consumer.pop().await.unwrap(), Some(b"second".to_vec()));
    assert_eq!(consumer.pop().await.unwrap(), None);
    assert!(producer.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_consumer_losing_last_item_sees_empty_queue() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let producer = queue(&service).await;
    let consumer = queue(&service).await;
    producer.push(b"only").await.unwrap();

    service.delete_before("get", "/jobs/item-0000000000");

    assert_eq!(consumer.pop().await.unwrap(), None);
    assert!(!service.contains("/jobs/item-0000000000"));
}

#[tokio::test]
async fn test_item_deleted_between_read_and_delete_is_skipped() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let producer = queue(&service).await;
    let consumer = queue(&service).await;
    producer.push(b"first").await.unwrap();
    producer.push(b"second").await.unwrap();

    service.delete_before("delete", "/jobs/item-0000000000");

    assert_eq!(consumer.pop().await.unwrap(), Some(b"second".to_vec()));
    assert!(producer.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_concurrent_consumers_drain_every_item_once() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let producer = queue(&service).await;
    for i in 0..20u32 {
        producer.push(format!("job-{i}").as_bytes()).await.unwrap();
    }

    let mut consumers = Vec::new();
    for _ in 0..3 {
        let consumer = queue(&service).await;
        consumers.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(item) = consumer.pop().await.unwrap() {
                seen.push(String::from_utf8(item).unwrap());
                tokio::task::yield_now().await;
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for consumer in consumers {
        all.extend(consumer.await.unwrap());
    }
    let unique: BTreeSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);
    assert!(producer.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_pop_blocking_wakes_on_push() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let consumer = queue(&service).await;
    let producer = Arc::new(queue(&service).await);

    let pusher = {
        let producer = producer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(b"late").await.unwrap();
        })
    };

    let item = consumer.pop_blocking(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(item, b"late");
    pusher.await.unwrap();
}

#[tokio::test]
async fn test_pop_blocking_without_deadline_returns_existing_item() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let queue = queue(&service).await;
    queue.push(b"ready").await.unwrap();

    assert_eq!(queue.pop_blocking(None).await.unwrap(), b"ready");
}

#[tokio::test]
async fn test_queue_requires_existing_path() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let session = SessionConnection::connect(&*service, test_config()).await.unwrap();

    let err = DistributedQueue::new(session, "/missing").await.err().unwrap();
    assert!(matches!(err, CoordinationError::MissingPath { .. }));
}

#[tokio::test]
async fn test_push_retries_connection_loss() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let queue = queue(&service).await;
    service.fail_next("create", keeper_types::KeeperError::ConnectionLoss {
        operation: "create".to_string(),
    });

    queue.push(b"retried").await.unwrap();
    assert_eq!(queue.items().await.unwrap(), vec!["item-0000000000"]);
}
