//! Distributed FIFO queue over persistent sequential nodes.

use std::sync::Arc;
use std::time::Duration;

use keeper_session::SessionConnection;
use keeper_types::Acl;
use keeper_types::CreateMode;
use keeper_types::KeeperError;
use keeper_types::Watcher;
use keeper_types::constants::QUEUE_ITEM_PREFIX;
use keeper_types::path;
use tokio::time::Instant;
use tracing::Instrument;
use tracing::Span;
use tracing::debug;
use tracing::info_span;
use tracing::warn;

use crate::error::CoordinationError;
use crate::error::MissingPathSnafu;
use crate::error::TimeoutSnafu;
use crate::verified;

/// Distributed FIFO queue.
///
/// Items are persistent sequential children `item-<seq>` of the queue path,
/// consumed in sequence order. Any number of producers and consumers may share
/// the path; a version-checked delete makes sure each item is popped once.
///
/// # Example
///
/// ```ignore
/// let queue = DistributedQueue::new(session, "/app/jobs").await?;
/// queue.push(b"job-1").await?;
/// let job = queue.pop_blocking(Some(Duration::from_secs(30))).await?;
/// ```
pub struct DistributedQueue {
    session: Arc<SessionConnection>,
    path: String,
    acl: Vec<Acl>,
    span: Span,
}

impl DistributedQueue {
    /// Create a queue under `path`, which must exist.
    ///
    /// # Arguments
    /// * `session` - Session used for every queue operation; may be shared
    /// * `path` - Parent path of the items
    ///
    /// Items inherit the ACL `path` has now.
    pub async fn new(session: Arc<SessionConnection>, path: impl Into<String>) -> Result<Self, CoordinationError> {
        let path = path.into();
        path::validate(&path)?;
        let acl = match session.get_acl(&path).await {
            Ok((acl, _)) => acl,
            Err(KeeperError::NoNode { .. }) => return MissingPathSnafu { path }.fail(),
            Err(err) => return Err(err.into()),
        };
        let span = info_span!(parent: session.span(), "queue", path = %path);
        Ok(Self {
            session,
            path,
            acl,
            span,
        })
    }

    /// Queue path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append an item and return its node name.
    ///
    /// Retried on connection loss. A create whose reply was lost may leave a
    /// duplicate item behind.
    pub async fn push(&self, data: &[u8]) -> Result<String, CoordinationError> {
        let item_path = path::join(&self.path, QUEUE_ITEM_PREFIX);
        let item_path = item_path.as_str();
        let created = self
            .session
            .retry_policy()
            .run("queue push", move || {
                self.session.create(item_path, data, &self.acl, CreateMode::PersistentSequential)
            })
            .instrument(self.span.clone())
            .await?;
        debug!(parent: &self.span, item = %created, "pushed item");
        Ok(path::name(&created).to_string())
    }

    /// Remove and return the head item, or `None` if the queue is empty.
    pub async fn pop(&self) -> Result<Option<Vec<u8>>, CoordinationError> {
        let data = self
            .session
            .retry_policy()
            .run("queue pop", move || self.pop_once())
            .instrument(self.span.clone())
            .await?;
        Ok(data)
    }

    async fn pop_once(&self) -> Result<Option<Vec<u8>>, KeeperError> {
        let items = verified::order_items(self.session.get_children(&self.path, None).await?);
        for item in &items {
            let item_path = path::join(&self.path, item);
            match self.remove(&item_path).await {
                Ok(data) => {
                    debug!(item = %item, "popped item");
                    return Ok(Some(data));
                }
                Err(KeeperError::NoNode { .. }) => {
                    debug!(item = %item, "item taken by another consumer");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Read an item and delete it at the version read.
    ///
    /// A concurrent modification of the item retries the same item.
    async fn remove(&self, item_path: &str) -> Result<Vec<u8>, KeeperError> {
        loop {
            let (data, stat) = self.session.get(item_path, None).await?;
            match self.session.delete(item_path, Some(stat.version)).await {
                Ok(()) => return Ok(data),
                Err(KeeperError::BadVersion { .. }) => {
                    warn!(item = %item_path, "queue item modified while popping; retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Remove and return the head item, waiting for one to arrive.
    ///
    /// `timeout` bounds the whole call; `None` waits indefinitely.
    pub async fn pop_blocking(&self, timeout: Option<Duration>) -> Result<Vec<u8>, CoordinationError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let (watcher, changed) = Watcher::channel();
            self.session.get_children(&self.path, Some(watcher)).await?;

            if let Some(data) = self.pop().await? {
                return Ok(data);
            }

            debug!(parent: &self.span, "queue empty; waiting for items");
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, changed).await.is_err() {
                        return TimeoutSnafu {
                            operation: format!("pop from queue '{}'", self.path),
                        }
                        .fail();
                    }
                }
                None => {
                    // A dropped watch (session loss) surfaces on the next call.
                    let _ = changed.await;
                }
            }
        }
    }

    /// Item names in consumption order.
    pub async fn items(&self) -> Result<Vec<String>, CoordinationError> {
        let children = self.session.get_children(&self.path, None).await?;
        Ok(verified::order_items(children))
    }

    /// Number of items.
    pub async fn len(&self) -> Result<usize, CoordinationError> {
        Ok(self.items().await?.len())
    }

    /// Returns true if the queue holds no items.
    pub async fn is_empty(&self) -> Result<bool, CoordinationError> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use keeper_testing::DeterministicCoordinationService;
    use keeper_testing::init_tracing;
    use keeper_testing::test_config;

    use super::*;

    async fn setup() -> (Arc<DeterministicCoordinationService>, Arc<SessionConnection>) {
        init_tracing();
        let service = DeterministicCoordinationService::new();
        let session = SessionConnection::connect(&*service, test_config()).await.unwrap();
        session.ensure_path_exists("/queue", b"", &Acl::open_unsafe(), true).await.unwrap();
        (service, session)
    }

    #[tokio::test]
    async fn test_push_pop_is_fifo() {
        let (_service, session) = setup().await;
        let queue = DistributedQueue::new(session, "/queue").await.unwrap();

        assert_eq!(queue.push(b"a").await.unwrap(), "item-0000000000");
        queue.push(b"b").await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);

        assert_eq!(queue.pop().await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(queue.pop().await.unwrap(), Some(b"b".to_vec()));
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_pop_on_empty_queue_returns_none() {
        let (_service, session) = setup().await;
        let queue = DistributedQueue::new(session, "/queue").await.unwrap();
        assert_eq!(queue.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_version_conflict_retries_same_item() {
        let (service, session) = setup().await;
        let queue = DistributedQueue::new(session, "/queue").await.unwrap();
        queue.push(b"first").await.unwrap();
        queue.push(b"second").await.unwrap();

        service.fail_next("delete", KeeperError::BadVersion {
            path: "/queue/item-0000000000".to_string(),
            expected: 0,
        });

        assert_eq!(queue.pop().await.unwrap(), Some(b"first".to_vec()));
        assert_eq!(queue.items().await.unwrap(), vec!["item-0000000001"]);
    }

    #[tokio::test]
    async fn test_pushed_items_inherit_queue_acl() {
        let (service, session) = setup().await;
        session.set_acl("/queue", &Acl::read_unsafe(), None).await.unwrap();
        let queue = DistributedQueue::new(session.clone(), "/queue").await.unwrap();

        let item = queue.push(b"x").await.unwrap();
        let (acl, _) = session.get_acl(&format!("/queue/{item}")).await.unwrap();
        assert_eq!(acl, Acl::read_unsafe());
        assert!(service.contains(&format!("/queue/{item}")));
    }

    #[tokio::test]
    async fn test_pop_blocking_times_out() {
        let (_service, session) = setup().await;
        let queue = DistributedQueue::new(session, "/queue").await.unwrap();

        let err = queue.pop_blocking(Some(Duration::from_millis(50))).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Timeout { .. }));
    }
}
