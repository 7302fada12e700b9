//! Lock behaviour across sessions on the in-memory coordination service.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use keeper_coordination::DistributedLock;
use keeper_coordination::LockListener;
use keeper_coordination::LockStatus;
use keeper_coordination::NoopListener;
use keeper_session::SessionConnection;
use keeper_testing::DeterministicCoordinationService;
use keeper_testing::init_tracing;
use keeper_testing::test_config;
use keeper_types::Acl;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct CountingListener {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl LockListener for CountingListener {
    fn lock_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn lock_released(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

async fn session(service: &DeterministicCoordinationService) -> Arc<SessionConnection> {
    let session = SessionConnection::connect(service, test_config()).await.unwrap();
    session.ensure_path_exists("/locks", b"", &Acl::open_unsafe(), true).await.unwrap();
    session
}

async fn wait_for_status(lock: &DistributedLock, done: impl FnMut(&LockStatus) -> bool) {
    let mut status = lock.subscribe();
    let reached = tokio::time::timeout(WAIT, status.wait_for(done)).await.map(|result| result.is_ok());
    assert!(matches!(reached, Ok(true)), "lock never reached the expected status");
}

#[tokio::test]
async fn test_at_most_one_holder_in_creation_order() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let mut locks = Vec::new();
    for _ in 0..4 {
        let session = session(&service).await;
        locks.push(DistributedLock::new(session, "/locks", Arc::new(NoopListener)).await.unwrap());
    }

    assert!(locks[0].acquire().await.unwrap());
    for lock in &locks[1..] {
        assert!(!lock.acquire().await.unwrap());
    }

    for lock in &locks {
        wait_for_status(lock, |status| status.is_held()).await;
        assert_eq!(locks.iter().filter(|other| other.is_owner()).count(), 1);
        lock.release().await.unwrap();
    }
    assert!(service.children("/locks").is_empty());
}

#[tokio::test]
async fn test_release_lets_another_instance_acquire() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let first = DistributedLock::new(session(&service).await, "/locks", Arc::new(NoopListener)).await.unwrap();
    let second = DistributedLock::new(session(&service).await, "/locks", Arc::new(NoopListener)).await.unwrap();

    assert!(first.acquire().await.unwrap());
    first.release().await.unwrap();
    assert!(second.acquire().await.unwrap());
    assert!(!first.is_owner());
}

#[tokio::test]
async fn test_waiter_is_notified_once() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let holder = DistributedLock::new(session(&service).await, "/locks", Arc::new(NoopListener)).await.unwrap();
    let listener = Arc::new(CountingListener::default());
    let waiter = DistributedLock::new(session(&service).await, "/locks", listener.clone()).await.unwrap();

    assert!(holder.acquire().await.unwrap());
    assert!(!waiter.acquire().await.unwrap());
    assert_eq!(listener.acquired.load(Ordering::SeqCst), 0);

    holder.release().await.unwrap();
    wait_for_status(&waiter, |status| status.is_held()).await;
    assert_eq!(listener.acquired.load(Ordering::SeqCst), 1);

    // Re-acquiring a held lock does not notify again.
    assert!(waiter.acquire().await.unwrap());
    assert_eq!(listener.acquired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_session_expiry_releases_held_lock() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let holder_session = session(&service).await;
    let listener = Arc::new(CountingListener::default());
    let holder = DistributedLock::new(holder_session.clone(), "/locks", listener.clone()).await.unwrap();
    let waiter = DistributedLock::new(session(&service).await, "/locks", Arc::new(NoopListener)).await.unwrap();

    assert!(holder.acquire().await.unwrap());
    assert!(!waiter.acquire().await.unwrap());
    assert_eq!(service.watch_count(), 1);

    service.expire_session(holder_session.session_id());

    wait_for_status(&holder, |status| *status == LockStatus::Idle).await;
    wait_for_status(&waiter, |status| status.is_held()).await;
    assert_eq!(listener.released.load(Ordering::SeqCst), 1);
    assert!(!holder.is_owner());
    assert_eq!(service.watch_count(), 0);
    assert_eq!(service.children("/locks"), vec![waiter.id().unwrap()]);
}

#[tokio::test]
async fn test_reconnect_revalidates_pending_lock() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let holder = DistributedLock::new(session(&service).await, "/locks", Arc::new(NoopListener)).await.unwrap();
    let waiter_session = session(&service).await;
    let waiter = DistributedLock::new(waiter_session.clone(), "/locks", Arc::new(NoopListener)).await.unwrap();

    assert!(holder.acquire().await.unwrap());
    assert!(!waiter.acquire().await.unwrap());

    service.disconnect(waiter_session.session_id());
    holder.release().await.unwrap();

    // The neighbor watch fired while disconnected; acquisition cannot finish yet.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(waiter.status(), LockStatus::Pending { .. }));
    assert!(!waiter.is_owner());

    service.reconnect(waiter_session.session_id());
    wait_for_status(&waiter, |status| status.is_held()).await;
    assert!(waiter.is_owner());
}

#[tokio::test]
async fn test_dropping_holder_hands_over_lock() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let holder = DistributedLock::new(session(&service).await, "/locks", Arc::new(NoopListener)).await.unwrap();
    let waiter = DistributedLock::new(session(&service).await, "/locks", Arc::new(NoopListener)).await.unwrap();

    assert!(holder.acquire().await.unwrap());
    assert!(!waiter.acquire().await.unwrap());

    drop(holder);
    wait_for_status(&waiter, |status| status.is_held()).await;
}

#[tokio::test]
async fn test_acquire_timeout_waits_for_release() {
    init_tracing();
    let service = DeterministicCoordinationService::new();
    let holder = Arc::new(
        DistributedLock::new(session(&service).await, "/locks", Arc::new(NoopListener)).await.unwrap(),
    );
    let waiter = DistributedLock::new(session(&service).await, "/locks", Arc::new(NoopListener)).await.unwrap();
    assert!(holder.acquire().await.unwrap());

    let releaser = {
        let holder = holder.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            holder.release().await.unwrap();
        })
    };

    waiter.acquire_timeout(WAIT).await.unwrap();
    assert!(waiter.is_owner());
    releaser.await.unwrap();
}
