//! Distributed mutual-exclusion lock over sequential ephemeral nodes.
//!
//! Every contender creates an ephemeral sequential node under the lock path.
//! The node with the lowest sequence number owns the lock; every other node
//! watches only the node immediately before it, so a release wakes exactly
//! one waiter and ownership passes in creation order.

use std::sync::Arc;
use std::time::Duration;

use keeper_session::SessionConnection;
use keeper_session::WatcherId;
use keeper_types::Acl;
use keeper_types::CreateMode;
use keeper_types::EventType;
use keeper_types::KeeperError;
use keeper_types::SessionState;
use keeper_types::Watcher;
use keeper_types::constants::MAX_LOCK_ACQUIRE_ITERATIONS;
use keeper_types::path;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;
use tracing::Span;
use tracing::debug;
use tracing::info;
use tracing::info_span;
use tracing::warn;

use crate::error::AcquisitionExhaustedSnafu;
use crate::error::CoordinationError;
use crate::error::MissingPathSnafu;
use crate::error::TimeoutSnafu;
use crate::verified;
use crate::verified::LockPosition;

/// Receives lock ownership changes.
///
/// Called from the lock's event task or from the caller of
/// [`DistributedLock::acquire`] / [`DistributedLock::release`]; implementations
/// must not block.
pub trait LockListener: Send + Sync {
    /// This instance became the owner.
    fn lock_acquired(&self) {}

    /// This instance gave up its node, or lost it with the session.
    fn lock_released(&self) {}
}

/// Listener that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl LockListener for NoopListener {}

/// Observable state of a [`DistributedLock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// No lock node.
    Idle,
    /// Node created; waiting for `neighbor` to go away.
    Pending {
        /// Own node name.
        node: String,
        /// Watched next-lower sibling.
        neighbor: String,
    },
    /// Node created and lowest among its siblings.
    Held {
        /// Own node name.
        node: String,
    },
}

impl LockStatus {
    /// Returns true if the lock is held.
    pub fn is_held(&self) -> bool {
        matches!(self, LockStatus::Held { .. })
    }

    /// Own node name, if one exists.
    pub fn node(&self) -> Option<&str> {
        match self {
            LockStatus::Idle => None,
            LockStatus::Pending { node, .. } | LockStatus::Held { node } => Some(node.as_str()),
        }
    }
}

/// Input to the lock's event task.
#[derive(Debug)]
enum LockEvent {
    Session(SessionState),
    NeighborChanged { node: String },
}

/// Mutable lock state, only touched with the mutex held.
#[derive(Debug, Default)]
struct LockNodes {
    own_node: Option<String>,
    lowest: Option<String>,
    watched_neighbor: Option<String>,
}

struct LockInner {
    session: Arc<SessionConnection>,
    path: String,
    prefix: String,
    acl: Vec<Acl>,
    listener: Arc<dyn LockListener>,
    nodes: Mutex<LockNodes>,
    status: watch::Sender<LockStatus>,
    events: mpsc::UnboundedSender<LockEvent>,
    span: Span,
}

/// Distributed lock bound to one session and one parent path.
///
/// Several instances may share a session; each gets its own node and they
/// compete like independent clients.
///
/// # Example
///
/// ```ignore
/// let lock = DistributedLock::new(session, "/app/locks", Arc::new(NoopListener)).await?;
/// lock.acquire_timeout(Duration::from_secs(5)).await?;
/// // critical section
/// lock.release().await?;
/// ```
pub struct DistributedLock {
    inner: Arc<LockInner>,
    watcher_id: WatcherId,
    task: Option<JoinHandle<()>>,
}

impl DistributedLock {
    /// Create a lock under `path`, which must exist.
    ///
    /// # Arguments
    /// * `session` - Session the lock node is bound to; may be shared
    /// * `path` - Parent path of the lock nodes
    /// * `listener` - Receives ownership changes
    ///
    /// Lock nodes inherit the ACL `path` has now; it is not read again.
    pub async fn new(
        session: Arc<SessionConnection>,
        path: impl Into<String>,
        listener: Arc<dyn LockListener>,
    ) -> Result<Self, CoordinationError> {
        let path = path.into();
        path::validate(&path)?;
        let acl = match session.get_acl(&path).await {
            Ok((acl, _)) => acl,
            Err(KeeperError::NoNode { .. }) => return MissingPathSnafu { path }.fail(),
            Err(err) => return Err(err.into()),
        };

        let instance = session.allocate_instance_id();
        let prefix = verified::lock_node_prefix(session.session_id(), instance);
        let span = info_span!(parent: session.span(), "lock", path = %path, instance);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(LockStatus::Idle);

        let watcher_id = {
            let events = events_tx.clone();
            session.add_global_watcher(move |event| {
                if event.event_type == EventType::Session {
                    let _ = events.send(LockEvent::Session(event.state));
                }
            })
        };

        let inner = Arc::new(LockInner {
            session,
            path,
            prefix,
            acl,
            listener,
            nodes: Mutex::new(LockNodes::default()),
            status,
            events: events_tx,
            span: span.clone(),
        });
        let task = tokio::spawn(run_events(inner.clone(), events_rx).instrument(span));
        debug!(parent: &inner.span, prefix = %inner.prefix, "lock created");

        Ok(Self {
            inner,
            watcher_id,
            task: Some(task),
        })
    }

    /// Lock parent path.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Own node name, if one exists.
    pub fn id(&self) -> Option<String> {
        self.inner.status.borrow().node().map(str::to_string)
    }

    /// Current state.
    pub fn status(&self) -> LockStatus {
        self.inner.status.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<LockStatus> {
        self.inner.status.subscribe()
    }

    /// Returns true if this instance owns the lock and the session is not lost.
    pub fn is_owner(&self) -> bool {
        self.inner.session.is_somehow_connected() && self.inner.status.borrow().is_held()
    }

    /// Try to take the lock without waiting.
    ///
    /// Returns true if the lock is held. Otherwise this instance is queued
    /// behind its neighbor and ownership arrives later; watch
    /// [`subscribe`](Self::subscribe) or the listener.
    pub async fn acquire(&self) -> Result<bool, CoordinationError> {
        if self.is_owner() {
            return Ok(true);
        }
        self.inner.acquire().await
    }

    /// Take the lock, waiting up to `timeout` for it.
    ///
    /// On timeout the node stays queued; call [`release`](Self::release) to
    /// leave the queue.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<(), CoordinationError> {
        let mut status = self.subscribe();
        if self.acquire().await? {
            return Ok(());
        }
        match tokio::time::timeout(timeout, status.wait_for(|status| status.is_held())).await {
            Ok(Ok(_)) => Ok(()),
            _ => TimeoutSnafu {
                operation: format!("acquire lock '{}'", self.inner.path),
            }
            .fail(),
        }
    }

    /// Release the lock or leave the queue.
    ///
    /// A no-op without a node or without a connection; the service removes
    /// the node with the session in the latter case. The delete is attempted
    /// once and its failure returned; the lock is idle and the listener is
    /// notified either way.
    pub async fn release(&self) -> Result<(), CoordinationError> {
        self.inner.release().await
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        self.inner.session.remove_global_watcher(self.watcher_id);
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let has_node = match self.inner.nodes.try_lock() {
            Ok(nodes) => nodes.own_node.is_some(),
            Err(_) => true,
        };
        if !has_node {
            return;
        }

        // Best effort; the node goes away with the session anyway.
        let inner = self.inner.clone();
        let span = inner.span.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(
                async move {
                    match inner.release().await {
                        Ok(()) => debug!("lock released on drop"),
                        Err(err) => debug!(error = %err, "lock release on drop failed"),
                    }
                }
                .instrument(span),
            );
        }
    }
}

impl LockInner {
    async fn acquire(self: &Arc<Self>) -> Result<bool, CoordinationError> {
        self.session
            .retry_policy()
            .run("acquire lock", || {
                let inner = self.clone();
                async move { inner.acquire_once().await }
            })
            .instrument(self.span.clone())
            .await
    }

    /// One pass of the acquisition state machine.
    async fn acquire_once(&self) -> Result<bool, CoordinationError> {
        let mut nodes = self.nodes.lock().await;
        let former_owner = nodes.lowest.clone();

        for _ in 0..MAX_LOCK_ACQUIRE_ITERATIONS {
            let own = match nodes.own_node.clone() {
                Some(own) => own,
                None => {
                    let own = self.get_or_create_node().await?;
                    nodes.own_node = Some(own.clone());
                    own
                }
            };

            let children = self.session.get_children(&self.path, None).await?;
            let order = verified::order_siblings(&children);
            for name in &order.ignored {
                warn!(node = %name, "ignoring lock sibling without a sequence number");
            }
            let Some(lowest) = order.ordered.first() else {
                warn!(node = %own, "no lock nodes found although ours was created");
                nodes.own_node = None;
                continue;
            };
            nodes.lowest = Some(lowest.clone());

            match verified::lock_position(&order.ordered, &own) {
                LockPosition::Missing => {
                    warn!(node = %own, "own lock node vanished; recreating");
                    nodes.own_node = None;
                }
                LockPosition::Behind { neighbor } => {
                    if nodes.watched_neighbor.as_deref() != Some(neighbor) {
                        debug!(node = %own, neighbor, "watching next lower lock node");
                        let neighbor_path = path::join(&self.path, neighbor);
                        if self.session.exists(&neighbor_path, Some(self.neighbor_watcher())).await?.is_none() {
                            debug!(neighbor, "next lower lock node already gone; retrying");
                            continue;
                        }
                        nodes.watched_neighbor = Some(neighbor.to_string());
                    }
                    self.status.send_replace(LockStatus::Pending {
                        node: own,
                        neighbor: neighbor.to_string(),
                    });
                    return Ok(false);
                }
                LockPosition::Lowest => {
                    nodes.watched_neighbor = None;
                    self.status.send_replace(LockStatus::Held { node: own.clone() });
                    if former_owner.as_deref() != Some(own.as_str()) {
                        info!(node = %own, "lock acquired");
                        self.listener.lock_acquired();
                    }
                    return Ok(true);
                }
            }
        }

        AcquisitionExhaustedSnafu {
            path: self.path.clone(),
            attempts: MAX_LOCK_ACQUIRE_ITERATIONS,
        }
        .fail()
    }

    /// Find this instance's node among the children, or create it.
    async fn get_or_create_node(&self) -> Result<String, KeeperError> {
        let children = self.session.get_children(&self.path, None).await?;
        if let Some(existing) = verified::find_own_node(&children, &self.prefix) {
            debug!(node = %existing, "found existing lock node");
            return Ok(existing.to_string());
        }

        let created = self
            .session
            .create(&path::join(&self.path, &self.prefix), &[], &self.acl, CreateMode::EphemeralSequential)
            .await?;
        debug!(node = %created, "created lock node");
        Ok(path::name(&created).to_string())
    }

    fn neighbor_watcher(&self) -> Watcher {
        let events = self.events.clone();
        Watcher::new(move |event| {
            if let Some(fired) = event.path {
                let _ = events.send(LockEvent::NeighborChanged {
                    node: path::name(&fired).to_string(),
                });
            }
        })
    }

    async fn release(&self) -> Result<(), CoordinationError> {
        let mut nodes = self.nodes.lock().await;
        let Some(own) = nodes.own_node.clone() else {
            debug!(parent: &self.span, "no lock node to release");
            return Ok(());
        };
        if !self.session.is_connected() {
            info!(parent: &self.span, node = %own, "not connected; lock node goes away with the session");
            return Ok(());
        }

        *nodes = LockNodes::default();
        self.status.send_replace(LockStatus::Idle);

        // Single attempt; a node left behind goes away with the session.
        let result = self.delete_node(&path::join(&self.path, &own)).await;
        drop(nodes);

        self.listener.lock_released();
        match result {
            Ok(()) => {
                info!(parent: &self.span, node = %own, "lock released");
                Ok(())
            }
            Err(err) => {
                warn!(parent: &self.span, node = %own, error = %err, "deleting lock node failed; it expires with the session");
                Err(err.into())
            }
        }
    }

    async fn delete_node(&self, node_path: &str) -> Result<(), KeeperError> {
        match self.session.delete(node_path, None).await {
            Ok(()) => Ok(()),
            Err(KeeperError::NoNode { .. }) => {
                debug!(path = %node_path, "lock node already deleted");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn on_session_expired(&self) {
        let mut nodes = self.nodes.lock().await;
        let had_node = nodes.own_node.is_some();
        *nodes = LockNodes::default();
        self.status.send_replace(LockStatus::Idle);
        drop(nodes);

        if had_node {
            warn!("session expired; lock released");
            self.listener.lock_released();
        }
    }

    async fn on_neighbor_changed(self: &Arc<Self>, node: String) {
        {
            let mut nodes = self.nodes.lock().await;
            if nodes.own_node.is_none() || nodes.watched_neighbor.as_deref() != Some(node.as_str()) {
                debug!(neighbor = %node, "ignoring stale neighbor watch");
                return;
            }
            // The watch is consumed; the next pass must arm a new one.
            nodes.watched_neighbor = None;
        }
        debug!(neighbor = %node, "next lower lock node changed");
        self.reacquire().await;
    }

    async fn on_session_event(self: &Arc<Self>, state: SessionState) {
        match state {
            SessionState::Expired => self.on_session_expired().await,
            SessionState::Connecting => warn!("session reconnecting; lock state unchanged"),
            state => {
                if self.nodes.lock().await.own_node.is_none() {
                    return;
                }
                debug!(state = %state, "session event; revalidating lock");
                self.reacquire().await;
            }
        }
    }

    async fn reacquire(self: &Arc<Self>) {
        match self.acquire().await {
            Ok(true) => debug!("lock held"),
            Ok(false) => debug!("still waiting for lock"),
            Err(err) => warn!(error = %err, "lock acquisition failed"),
        }
    }
}

async fn run_events(inner: Arc<LockInner>, mut events: mpsc::UnboundedReceiver<LockEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            LockEvent::Session(state) => inner.on_session_event(state).await,
            LockEvent::NeighborChanged { node } => inner.on_neighbor_changed(node).await,
        }
    }
}
