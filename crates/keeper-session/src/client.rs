//! Interface to the backing coordination-service client.
//!
//! One named method per operation, bound to a single session. Implementations
//! wrap a native client binding; `keeper-testing` provides an in-memory one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keeper_types::Acl;
use keeper_types::CreateMode;
use keeper_types::KeeperError;
use keeper_types::SessionState;
use keeper_types::Stat;
use keeper_types::WatchedEvent;
use keeper_types::Watcher;
use tokio::sync::mpsc;

/// Channel on which a session delivers its global (session state) events.
pub type SessionEventSender = mpsc::UnboundedSender<WatchedEvent>;

/// Callback acknowledging an `add_auth` request.
pub type AuthCallback = Box<dyn FnOnce(Result<(), KeeperError>) + Send + 'static>;

/// Opens sessions against a set of servers.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Start a session.
    ///
    /// Returns as soon as the handle exists; the session reports reaching
    /// [`SessionState::Connected`] through `events`.
    async fn connect(
        &self,
        servers: &[String],
        session_timeout: Duration,
        events: SessionEventSender,
    ) -> Result<Arc<dyn CoordinationClient>, KeeperError>;
}

/// Operations on one open session.
///
/// Watches are one-shot: a [`Watcher`] passed to `exists`, `get` or
/// `get_children` fires at most once, on the next matching change.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Service-assigned session identifier.
    fn session_id(&self) -> i64;

    /// Current session state. Fails once the handle is closed.
    fn state(&self) -> Result<SessionState, KeeperError>;

    /// Receive timeout negotiated with the service.
    fn recv_timeout(&self) -> Duration;

    /// Send credentials; `ack` is invoked once the service answers.
    fn add_auth(&self, scheme: &str, credentials: &[u8], ack: AuthCallback);

    /// Create a node and return its actual path (sequence suffix included).
    async fn create(&self, path: &str, data: &[u8], acl: &[Acl], mode: CreateMode) -> Result<String, KeeperError>;

    /// Delete a node; `version` of `None` matches any version.
    async fn delete(&self, path: &str, version: Option<i32>) -> Result<(), KeeperError>;

    /// Stat a node, optionally watching for its creation, deletion or data change.
    async fn exists(&self, path: &str, watch: Option<Watcher>) -> Result<Option<Stat>, KeeperError>;

    /// Read a node's data, optionally watching for deletion or data change.
    async fn get(&self, path: &str, watch: Option<Watcher>) -> Result<(Vec<u8>, Stat), KeeperError>;

    /// Replace a node's data; `version` of `None` matches any version.
    async fn set(&self, path: &str, data: &[u8], version: Option<i32>) -> Result<Stat, KeeperError>;

    /// List child names, optionally watching for children changes.
    async fn get_children(&self, path: &str, watch: Option<Watcher>) -> Result<Vec<String>, KeeperError>;

    /// Read a node's ACL.
    async fn get_acl(&self, path: &str) -> Result<(Vec<Acl>, Stat), KeeperError>;

    /// Replace a node's ACL; `version` of `None` matches any ACL version.
    async fn set_acl(&self, path: &str, acl: &[Acl], version: Option<i32>) -> Result<Stat, KeeperError>;

    /// Close the session.
    async fn close(&self) -> Result<(), KeeperError>;
}
