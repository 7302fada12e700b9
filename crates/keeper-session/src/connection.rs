//! A coordination-service session and its global watch fan-out.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use keeper_types::Acl;
use keeper_types::CreateMode;
use keeper_types::KeeperError;
use keeper_types::SessionState;
use keeper_types::Stat;
use keeper_types::WatchedEvent;
use keeper_types::Watcher;
use keeper_types::path;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument;
use tracing::Span;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing::warn;

use crate::client::CoordinationClient;
use crate::client::Connector;
use crate::config::SessionConfig;
use crate::retry::RetryPolicy;
use crate::watchers::GlobalWatcherSet;
use crate::watchers::WatcherId;

/// Owns one session with the coordination service.
///
/// Session events reported by the backing client are fanned out to every
/// observer in the [`GlobalWatcherSet`] on a dedicated notification task.
/// Node operations forward to the bound client. Share it between locks and
/// queues through an `Arc`.
///
/// # Example
///
/// ```ignore
/// let session = SessionConnection::connect(&connector, SessionConfig::new(["zk1:2181"])).await?;
/// session.ensure_path_exists("/app/locks", b"", &Acl::open_unsafe(), true).await?;
/// ```
pub struct SessionConnection {
    client: Arc<dyn CoordinationClient>,
    config: SessionConfig,
    watchers: GlobalWatcherSet,
    retry: RetryPolicy,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    next_instance: AtomicU64,
    span: Span,
}

impl fmt::Debug for SessionConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConnection")
            .field("session_id", &format_args!("{:#x}", self.client.session_id()))
            .field("servers", &self.config.servers)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SessionConnection {
    /// Open a session and wait until it is connected.
    ///
    /// # Arguments
    /// * `connector` - Factory for backing-client sessions
    /// * `config` - Servers, timeouts and retry settings; validated before connecting
    ///
    /// Fails with [`KeeperError::ConnectFailed`] if the session does not reach
    /// [`SessionState::Connected`] within `config.connect_timeout_ms`.
    pub async fn connect(connector: &dyn Connector, config: SessionConfig) -> Result<Arc<Self>, KeeperError> {
        config.validate().map_err(|e| KeeperError::InvalidArgument { reason: e.to_string() })?;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let client = connector.connect(&config.servers, config.session_timeout(), events_tx).await?;
        let span = info_span!("session", session_id = %format!("{:#x}", client.session_id()));

        let connected = match client.state() {
            Ok(SessionState::Connected) => {
                skip_connect_events(&mut events_rx);
                true
            }
            _ => tokio::time::timeout(config.connect_timeout(), wait_for_connected(&mut events_rx))
                .await
                .unwrap_or(false),
        };
        let state = client.state().unwrap_or(SessionState::Disconnected);

        if !connected || state != SessionState::Connected {
            warn!(parent: &span, servers = ?config.servers, state = %state, "session did not connect in time");
            if let Err(err) = client.close().await {
                debug!(parent: &span, error = %err, "closing unconnected session failed");
            }
            return Err(KeeperError::ConnectFailed {
                servers: config.servers.clone(),
                state,
            });
        }

        info!(parent: &span, servers = ?config.servers, "session connected");

        let watchers = GlobalWatcherSet::new();
        let dispatcher = tokio::spawn(dispatch_events(events_rx, watchers.clone()).instrument(span.clone()));

        Ok(Arc::new(Self {
            client,
            retry: RetryPolicy::from(&config.retry),
            config,
            watchers,
            dispatcher: Mutex::new(Some(dispatcher)),
            closed: AtomicBool::new(false),
            next_instance: AtomicU64::new(0),
            span,
        }))
    }

    /// Service-assigned session id.
    pub fn session_id(&self) -> i64 {
        self.client.session_id()
    }

    /// Servers this session was opened against.
    pub fn servers(&self) -> &[String] {
        &self.config.servers
    }

    /// Configuration the session was opened with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Retry policy derived from the configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Span carrying the session's identity; recipes nest their spans under it.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Allocate a number unique among recipe instances on this session.
    pub fn allocate_instance_id(&self) -> u64 {
        self.next_instance.fetch_add(1, Ordering::Relaxed)
    }

    /// Current session state.
    pub fn state(&self) -> Result<SessionState, KeeperError> {
        self.client.state()
    }

    /// Returns true if the session is connected. Never fails.
    pub fn is_connected(&self) -> bool {
        matches!(self.client.state(), Ok(SessionState::Connected))
    }

    /// Returns true if the session is connected or reconnecting.
    pub fn is_somehow_connected(&self) -> bool {
        matches!(self.client.state(), Ok(SessionState::Connected | SessionState::Connecting))
    }

    /// Returns true if the service expired the session.
    pub fn is_expired(&self) -> bool {
        matches!(self.client.state(), Ok(SessionState::Expired))
    }

    /// Receive timeout negotiated with the service.
    pub fn recv_timeout(&self) -> Duration {
        self.client.recv_timeout()
    }

    /// Add credentials to the session.
    ///
    /// Waits up to [`recv_timeout`](Self::recv_timeout) for the service to
    /// acknowledge. Returns false if it refused or did not answer in time.
    pub async fn add_auth(&self, scheme: &str, credentials: &[u8]) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        debug!(parent: &self.span, scheme, "adding auth");
        self.client.add_auth(
            scheme,
            credentials,
            Box::new(move |result| {
                let _ = ack_tx.send(result);
            }),
        );

        let wait = self.recv_timeout();
        match tokio::time::timeout(wait, ack_rx).await {
            Ok(Ok(Ok(()))) => {
                debug!(parent: &self.span, scheme, "auth added");
                true
            }
            Ok(Ok(Err(err))) => {
                warn!(parent: &self.span, scheme, error = %err, "could not set authentication");
                false
            }
            Ok(Err(_)) => {
                warn!(parent: &self.span, scheme, "auth acknowledgement dropped");
                false
            }
            Err(_) => {
                warn!(
                    parent: &self.span,
                    scheme,
                    wait_ms = wait.as_millis() as u64,
                    "service did not acknowledge auth in time"
                );
                false
            }
        }
    }

    /// Register an observer of session events.
    pub fn add_global_watcher(&self, watcher: impl Fn(&WatchedEvent) + Send + Sync + 'static) -> WatcherId {
        self.watchers.add(watcher)
    }

    /// Remove an observer. Unknown ids are logged and ignored.
    pub fn remove_global_watcher(&self, id: WatcherId) -> bool {
        self.watchers.remove(id)
    }

    /// Make sure `path` exists, creating it with `data` and `acl` if needed.
    ///
    /// With `recursive`, missing ancestors are created first with empty data and
    /// the same ACL. Safe to retry: nodes created by a concurrent caller count as
    /// success. Retried on connection loss.
    pub async fn ensure_path_exists(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        recursive: bool,
    ) -> Result<bool, KeeperError> {
        path::validate(path)?;
        self.retry
            .run("ensure path exists", move || self.ensure_path_once(path, data, acl, recursive))
            .instrument(self.span.clone())
            .await
    }

    async fn ensure_path_once(&self, path: &str, data: &[u8], acl: &[Acl], recursive: bool) -> Result<bool, KeeperError> {
        if self.exists(path, None).await?.is_some() {
            return Ok(true);
        }

        if recursive {
            for ancestor in path::ancestors(path) {
                if self.exists(ancestor, None).await?.is_none() {
                    self.create_if_absent(ancestor, &[], acl).await?;
                }
            }
        }

        self.create_if_absent(path, data, acl).await?;
        Ok(true)
    }

    async fn create_if_absent(&self, path: &str, data: &[u8], acl: &[Acl]) -> Result<(), KeeperError> {
        match self.create(path, data, acl, CreateMode::Persistent).await {
            Ok(created) => {
                debug!(path = %created, "created node");
                Ok(())
            }
            Err(KeeperError::NodeExists { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Create a node and return its actual path.
    pub async fn create(&self, path: &str, data: &[u8], acl: &[Acl], mode: CreateMode) -> Result<String, KeeperError> {
        self.client.create(path, data, acl, mode).await
    }

    /// Delete a node; `version` of `None` matches any version.
    pub async fn delete(&self, path: &str, version: Option<i32>) -> Result<(), KeeperError> {
        self.client.delete(path, version).await
    }

    /// Stat a node, optionally leaving a one-shot watch.
    pub async fn exists(&self, path: &str, watch: Option<Watcher>) -> Result<Option<Stat>, KeeperError> {
        self.client.exists(path, watch).await
    }

    /// Read a node's data, optionally leaving a one-shot watch.
    pub async fn get(&self, path: &str, watch: Option<Watcher>) -> Result<(Vec<u8>, Stat), KeeperError> {
        self.client.get(path, watch).await
    }

    /// Replace a node's data.
    pub async fn set(&self, path: &str, data: &[u8], version: Option<i32>) -> Result<Stat, KeeperError> {
        self.client.set(path, data, version).await
    }

    /// List child names, optionally leaving a one-shot children watch.
    pub async fn get_children(&self, path: &str, watch: Option<Watcher>) -> Result<Vec<String>, KeeperError> {
        self.client.get_children(path, watch).await
    }

    /// Read a node's ACL.
    pub async fn get_acl(&self, path: &str) -> Result<(Vec<Acl>, Stat), KeeperError> {
        self.client.get_acl(path).await
    }

    /// Replace a node's ACL.
    pub async fn set_acl(&self, path: &str, acl: &[Acl], version: Option<i32>) -> Result<Stat, KeeperError> {
        self.client.set_acl(path, acl, version).await
    }

    /// Close the session.
    ///
    /// Retried up to `close_attempts` times. Returns false if every attempt
    /// failed; never returns an error.
    pub async fn close(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) || self.client.state().is_err() {
            warn!(parent: &self.span, "session is already closed");
            self.closed.store(true, Ordering::SeqCst);
            self.stop_dispatcher();
            return true;
        }

        debug!(parent: &self.span, "closing session");
        for attempt in 1..=self.config.close_attempts {
            match self.client.close().await {
                Ok(()) => {
                    self.closed.store(true, Ordering::SeqCst);
                    self.stop_dispatcher();
                    info!(parent: &self.span, "session closed");
                    return true;
                }
                Err(err) => {
                    info!(parent: &self.span, attempt, error = %err, "error while closing session, retrying");
                }
            }
        }

        error!(parent: &self.span, attempts = self.config.close_attempts, "failed closing the session");
        false
    }

    fn stop_dispatcher(&self) {
        if let Some(task) = self.dispatcher.lock().take() {
            task.abort();
        }
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        self.stop_dispatcher();
        if self.closed.load(Ordering::SeqCst) || !self.is_connected() {
            return;
        }

        warn!(parent: &self.span, "closing open session on drop");
        let client = self.client.clone();
        let span = self.span.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(
                    async move {
                        if let Err(err) = client.close().await {
                            warn!(error = %err, "closing session on drop failed");
                        }
                    }
                    .instrument(span),
                );
            }
            Err(_) => {
                warn!(parent: &self.span, "no runtime available; session will expire on the service");
            }
        }
    }
}

/// Discard already queued transitions up to and including `Connected`.
fn skip_connect_events(events: &mut mpsc::UnboundedReceiver<WatchedEvent>) {
    while let Ok(event) = events.try_recv() {
        if event.state == SessionState::Connected {
            break;
        }
    }
}

async fn wait_for_connected(events: &mut mpsc::UnboundedReceiver<WatchedEvent>) -> bool {
    while let Some(event) = events.recv().await {
        if event.state == SessionState::Connected {
            return true;
        }
        if event.state.is_terminal() {
            return false;
        }
    }
    false
}

async fn dispatch_events(mut events: mpsc::UnboundedReceiver<WatchedEvent>, watchers: GlobalWatcherSet) {
    while let Some(event) = events.recv().await {
        debug!(
            event_type = %event.event_type,
            state = %event.state,
            path = ?event.path,
            watchers = watchers.len(),
            "session event"
        );
        if event.state == SessionState::Expired {
            warn!("session expired; ephemeral nodes and watches are gone");
        }
        watchers.dispatch(&event);
    }
    debug!("session event channel closed");
}
