//! In-memory coordination service for deterministic tests.
//!
//! Implements the backing-client contract without network I/O: a node tree
//! with versions, sequential naming, ephemeral ownership and one-shot watches,
//! plus controls for injecting faults and driving session transitions.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keeper_session::AuthCallback;
use keeper_session::Connector;
use keeper_session::CoordinationClient;
use keeper_session::SessionEventSender;
use keeper_types::Acl;
use keeper_types::CreateMode;
use keeper_types::EventType;
use keeper_types::KeeperError;
use keeper_types::SessionState;
use keeper_types::Stat;
use keeper_types::WatchedEvent;
use keeper_types::Watcher;
use keeper_types::constants::SEQUENCE_DIGITS;
use keeper_types::path;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;

/// First session id handed out.
const FIRST_SESSION_ID: i64 = 0x0100_0000;

/// How the service answers `add_auth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthBehavior {
    /// Acknowledge success immediately.
    #[default]
    Accept,
    /// Acknowledge with [`KeeperError::AuthFailed`].
    Reject,
    /// Never acknowledge.
    Silent,
}

struct Node {
    data: Vec<u8>,
    acl: Vec<Acl>,
    stat: Stat,
    /// Next sequence number for sequential children.
    sequence: u64,
}

struct SessionEntry {
    state: SessionState,
    events: SessionEventSender,
    timeout: Duration,
}

struct PendingWatch {
    session_id: i64,
    watcher: Watcher,
}

type WatchTable = HashMap<String, Vec<PendingWatch>>;

/// Watches triggered by an operation, fired once the tree lock is released.
type Fired = Vec<(Watcher, WatchedEvent)>;

struct ServiceState {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<i64, SessionEntry>,
    next_session_id: i64,
    zxid: i64,
    data_watches: WatchTable,
    child_watches: WatchTable,
    faults: HashMap<String, VecDeque<KeeperError>>,
    /// Paths removed right before an operation, keyed by operation.
    interference: HashMap<String, VecDeque<String>>,
    writes: u64,
    unreachable: bool,
    auth: AuthBehavior,
    silent_acks: Vec<AuthCallback>,
    recv_timeout: Option<Duration>,
}

impl ServiceState {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: Vec::new(),
                acl: Acl::open_unsafe(),
                stat: Stat::default(),
                sequence: 0,
            },
        );
        Self {
            nodes,
            sessions: HashMap::new(),
            next_session_id: FIRST_SESSION_ID,
            zxid: 0,
            data_watches: HashMap::new(),
            child_watches: HashMap::new(),
            faults: HashMap::new(),
            interference: HashMap::new(),
            writes: 0,
            unreachable: false,
            auth: AuthBehavior::Accept,
            silent_acks: Vec::new(),
            recv_timeout: None,
        }
    }

    fn take_fault(&mut self, operation: &str) -> Option<KeeperError> {
        self.faults.get_mut(operation).and_then(VecDeque::pop_front)
    }

    /// Apply the next queued removal for `operation` once its node exists.
    fn interfere(&mut self, operation: &str, fired: &mut Fired) {
        let due = match self.interference.get_mut(operation) {
            Some(queue) if queue.front().is_some_and(|path| self.nodes.contains_key(path)) => queue.pop_front(),
            _ => None,
        };
        if let Some(path) = due {
            match self.delete(&path, None, fired) {
                Ok(()) => debug!(path = %path, operation, "node removed by another client"),
                Err(err) => debug!(path = %path, operation, error = %err, "interfering delete failed"),
            }
        }
    }

    /// Gate an operation on the session state.
    fn check(&self, session_id: i64, operation: &str) -> Result<(), KeeperError> {
        match self.sessions.get(&session_id).map(|entry| entry.state) {
            None => Err(KeeperError::SessionClosed),
            Some(SessionState::Connected) => Ok(()),
            Some(SessionState::Expired) => Err(KeeperError::SessionExpired),
            Some(_) => Err(KeeperError::ConnectionLoss {
                operation: operation.to_string(),
            }),
        }
    }

    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.zxid
    }

    fn node(&self, path: &str) -> Result<&Node, KeeperError> {
        self.nodes.get(path).ok_or_else(|| KeeperError::NoNode { path: path.to_string() })
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut Node, KeeperError> {
        self.nodes.get_mut(path).ok_or_else(|| KeeperError::NoNode { path: path.to_string() })
    }

    fn children(&self, parent: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|key| key.as_str() != "/" && path::parent(key) == Some(parent))
            .map(|key| path::name(key).to_string())
            .collect()
    }

    fn create(
        &mut self,
        session_id: i64,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
        fired: &mut Fired,
    ) -> Result<String, KeeperError> {
        path::validate(path)?;
        let parent = path::parent(path).ok_or_else(|| KeeperError::NodeExists { path: path.to_string() })?;
        let parent_node = self.node(parent)?;
        if parent_node.stat.is_ephemeral() {
            return Err(KeeperError::InvalidArgument {
                reason: format!("ephemeral node '{parent}' cannot have children"),
            });
        }

        let actual = if mode.is_sequential() {
            format!("{path}{:0width$}", parent_node.sequence, width = SEQUENCE_DIGITS)
        } else {
            path.to_string()
        };
        if self.nodes.contains_key(&actual) {
            return Err(KeeperError::NodeExists { path: actual });
        }

        let zxid = self.next_zxid();
        let parent_node = self.node_mut(parent)?;
        if mode.is_sequential() {
            parent_node.sequence += 1;
        }
        parent_node.stat.cversion += 1;
        parent_node.stat.num_children += 1;
        parent_node.stat.pzxid = zxid;

        self.nodes.insert(
            actual.clone(),
            Node {
                data: data.to_vec(),
                acl: acl.to_vec(),
                stat: Stat {
                    czxid: zxid,
                    mzxid: zxid,
                    ctime: zxid,
                    mtime: zxid,
                    ephemeral_owner: if mode.is_ephemeral() { session_id } else { 0 },
                    data_length: data.len() as i32,
                    pzxid: zxid,
                    ..Stat::default()
                },
                sequence: 0,
            },
        );
        self.writes += 1;

        drain_watches(&mut self.data_watches, &actual, EventType::NodeCreated, fired);
        drain_watches(&mut self.child_watches, parent, EventType::NodeChildrenChanged, fired);
        Ok(actual)
    }

    fn delete(&mut self, path: &str, version: Option<i32>, fired: &mut Fired) -> Result<(), KeeperError> {
        let parent = path::parent(path).ok_or_else(|| KeeperError::InvalidArgument {
            reason: "the root node cannot be deleted".to_string(),
        })?;
        let node = self.node(path)?;
        if let Some(expected) = version
            && expected != node.stat.version
        {
            return Err(KeeperError::BadVersion {
                path: path.to_string(),
                expected,
            });
        }
        if node.stat.num_children > 0 {
            return Err(KeeperError::NotEmpty { path: path.to_string() });
        }

        self.nodes.remove(path);
        let zxid = self.next_zxid();
        if let Ok(parent_node) = self.node_mut(parent) {
            parent_node.stat.cversion += 1;
            parent_node.stat.num_children -= 1;
            parent_node.stat.pzxid = zxid;
        }
        self.writes += 1;

        drain_watches(&mut self.data_watches, path, EventType::NodeDeleted, fired);
        drain_watches(&mut self.child_watches, path, EventType::NodeDeleted, fired);
        drain_watches(&mut self.child_watches, parent, EventType::NodeChildrenChanged, fired);
        Ok(())
    }

    fn set(&mut self, path: &str, data: &[u8], version: Option<i32>, fired: &mut Fired) -> Result<Stat, KeeperError> {
        let zxid = self.zxid + 1;
        let node = self.node_mut(path)?;
        if let Some(expected) = version
            && expected != node.stat.version
        {
            return Err(KeeperError::BadVersion {
                path: path.to_string(),
                expected,
            });
        }
        node.data = data.to_vec();
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        node.stat.mtime = zxid;
        node.stat.data_length = data.len() as i32;
        let stat = node.stat;

        self.zxid = zxid;
        self.writes += 1;
        drain_watches(&mut self.data_watches, path, EventType::NodeDataChanged, fired);
        Ok(stat)
    }

    fn set_acl(&mut self, path: &str, acl: &[Acl], version: Option<i32>) -> Result<Stat, KeeperError> {
        let node = self.node_mut(path)?;
        if let Some(expected) = version
            && expected != node.stat.aversion
        {
            return Err(KeeperError::BadVersion {
                path: path.to_string(),
                expected,
            });
        }
        node.acl = acl.to_vec();
        node.stat.aversion += 1;
        let stat = node.stat;
        self.writes += 1;
        Ok(stat)
    }

    fn watch(table: &mut WatchTable, session_id: i64, path: &str, watcher: Option<Watcher>) {
        if let Some(watcher) = watcher {
            table.entry(path.to_string()).or_default().push(PendingWatch { session_id, watcher });
        }
    }

    fn drop_session_watches(&mut self, session_id: i64) {
        for table in [&mut self.data_watches, &mut self.child_watches] {
            for watches in table.values_mut() {
                watches.retain(|watch| watch.session_id != session_id);
            }
            table.retain(|_, watches| !watches.is_empty());
        }
    }

    fn remove_ephemerals(&mut self, session_id: i64, fired: &mut Fired) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.stat.ephemeral_owner == session_id)
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            if let Err(err) = self.delete(&path, None, fired) {
                debug!(path = %path, error = %err, "ephemeral cleanup failed");
            }
        }
    }

    fn transition(&mut self, session_id: i64, state: SessionState) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(entry) if entry.state != SessionState::Expired => {
                entry.state = state;
                // The session owner may already have dropped its receiver.
                let _ = entry.events.send(WatchedEvent::session(state));
                true
            }
            _ => false,
        }
    }
}

fn drain_watches(table: &mut WatchTable, path: &str, event_type: EventType, fired: &mut Fired) {
    if let Some(watches) = table.remove(path) {
        fired.extend(
            watches
                .into_iter()
                .map(|watch| (watch.watcher, WatchedEvent::node(event_type, path))),
        );
    }
}

fn fire(fired: Fired) {
    for (watcher, event) in fired {
        watcher.fire(event);
    }
}

/// In-memory deterministic implementation of [`Connector`] for testing.
///
/// Every session opened through it shares one node tree. Operations complete
/// immediately; watches fire synchronously on the calling task once the tree
/// lock is released.
///
/// # Example
///
/// ```ignore
/// let service = DeterministicCoordinationService::new();
/// let session = SessionConnection::connect(&*service, SessionConfig::new(["mem:2181"])).await?;
/// service.expire_session(session.session_id());
/// ```
pub struct DeterministicCoordinationService {
    state: Arc<Mutex<ServiceState>>,
}

impl Default for DeterministicCoordinationService {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServiceState::new())),
        }
    }
}

impl DeterministicCoordinationService {
    /// Create a service holding only the root node.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// When unreachable, new sessions stay in `Connecting` forever.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    /// Choose how `add_auth` is answered.
    pub fn set_auth_behavior(&self, behavior: AuthBehavior) {
        self.state.lock().auth = behavior;
    }

    /// Override the receive timeout reported to every session.
    pub fn set_recv_timeout(&self, timeout: Duration) {
        self.state.lock().recv_timeout = Some(timeout);
    }

    /// Make the next call of `operation` (e.g. `"create"`, `"delete"`, `"close"`)
    /// fail with `err`. Queued faults are consumed in order.
    pub fn fail_next(&self, operation: &str, err: KeeperError) {
        self.state.lock().faults.entry(operation.to_string()).or_default().push_back(err);
    }

    /// Delete `path` right before the next call of `operation` that finds it
    /// present, as if another client removed it. Removals queued for the same
    /// operation apply in order.
    pub fn delete_before(&self, operation: &str, path: &str) {
        self.state
            .lock()
            .interference
            .entry(operation.to_string())
            .or_default()
            .push_back(path.to_string());
    }

    /// Expire a session: its watches are dropped, its ephemeral nodes are
    /// deleted and it receives an `Expired` event.
    pub fn expire_session(&self, session_id: i64) {
        let mut fired = Vec::new();
        {
            let mut state = self.state.lock();
            if !state.sessions.contains_key(&session_id) {
                return;
            }
            state.drop_session_watches(session_id);
            state.remove_ephemerals(session_id, &mut fired);
            state.transition(session_id, SessionState::Expired);
        }
        info!(session_id, "session expired");
        fire(fired);
    }

    /// Drop the session's connection; operations fail with connection loss
    /// until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self, session_id: i64) {
        if self.state.lock().transition(session_id, SessionState::Connecting) {
            debug!(session_id, "session disconnected");
        }
    }

    /// Restore a disconnected session. Watches and ephemeral nodes survive.
    pub fn reconnect(&self, session_id: i64) {
        if self.state.lock().transition(session_id, SessionState::Connected) {
            debug!(session_id, "session reconnected");
        }
    }

    /// Current state of a session, `None` once closed.
    pub fn session_state(&self, session_id: i64) -> Option<SessionState> {
        self.state.lock().sessions.get(&session_id).map(|entry| entry.state)
    }

    /// Number of successful mutations (create, delete, set, set-acl).
    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }

    /// Number of registered, not yet fired watches.
    pub fn watch_count(&self) -> usize {
        let state = self.state.lock();
        state.data_watches.values().chain(state.child_watches.values()).map(Vec::len).sum()
    }

    /// Returns true if a node exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.state.lock().nodes.contains_key(path)
    }

    /// Data of the node at `path`.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().nodes.get(path).map(|node| node.data.clone())
    }

    /// Sorted child names of `path`.
    pub fn children(&self, path: &str) -> Vec<String> {
        self.state.lock().children(path)
    }
}

#[async_trait]
impl Connector for DeterministicCoordinationService {
    async fn connect(
        &self,
        servers: &[String],
        session_timeout: Duration,
        events: SessionEventSender,
    ) -> Result<Arc<dyn CoordinationClient>, KeeperError> {
        let id = {
            let mut state = self.state.lock();
            state.next_session_id += 1;
            let id = state.next_session_id;
            let initial = if state.unreachable {
                SessionState::Connecting
            } else {
                SessionState::Connected
            };
            // Receiver is held by the caller for the life of the session.
            let _ = events.send(WatchedEvent::session(initial));
            state.sessions.insert(id, SessionEntry {
                state: initial,
                events,
                timeout: session_timeout,
            });
            id
        };
        debug!(session_id = id, servers = ?servers, "session opened");
        Ok(Arc::new(DeterministicSession {
            id,
            state: self.state.clone(),
        }))
    }
}

/// One session on a [`DeterministicCoordinationService`].
struct DeterministicSession {
    id: i64,
    state: Arc<Mutex<ServiceState>>,
}

impl DeterministicSession {
    /// Run `op` against the tree after the session and fault checks pass.
    fn run<T>(
        &self,
        operation: &str,
        op: impl FnOnce(&mut ServiceState, &mut Fired) -> Result<T, KeeperError>,
    ) -> Result<T, KeeperError> {
        let mut fired = Vec::new();
        let result = {
            let mut state = self.state.lock();
            match state.check(self.id, operation) {
                Ok(()) => {
                    state.interfere(operation, &mut fired);
                    match state.take_fault(operation) {
                        Some(err) => Err(err),
                        None => op(&mut *state, &mut fired),
                    }
                }
                Err(err) => Err(err),
            }
        };
        fire(fired);
        result
    }
}

#[async_trait]
impl CoordinationClient for DeterministicSession {
    fn session_id(&self) -> i64 {
        self.id
    }

    fn state(&self) -> Result<SessionState, KeeperError> {
        self.state
            .lock()
            .sessions
            .get(&self.id)
            .map(|entry| entry.state)
            .ok_or(KeeperError::SessionClosed)
    }

    fn recv_timeout(&self) -> Duration {
        let state = self.state.lock();
        let negotiated = state.sessions.get(&self.id).map(|entry| entry.timeout * 2 / 3).unwrap_or_default();
        state.recv_timeout.unwrap_or(negotiated)
    }

    fn add_auth(&self, scheme: &str, _credentials: &[u8], ack: AuthCallback) {
        let behavior = self.state.lock().auth;
        debug!(scheme, ?behavior, "auth requested");
        match behavior {
            AuthBehavior::Accept => ack(Ok(())),
            AuthBehavior::Reject => ack(Err(KeeperError::AuthFailed {
                scheme: scheme.to_string(),
            })),
            AuthBehavior::Silent => self.state.lock().silent_acks.push(ack),
        }
    }

    async fn create(&self, path: &str, data: &[u8], acl: &[Acl], mode: CreateMode) -> Result<String, KeeperError> {
        let id = self.id;
        self.run("create", |state, fired| state.create(id, path, data, acl, mode, fired))
    }

    async fn delete(&self, path: &str, version: Option<i32>) -> Result<(), KeeperError> {
        self.run("delete", |state, fired| state.delete(path, version, fired))
    }

    async fn exists(&self, path: &str, watch: Option<Watcher>) -> Result<Option<Stat>, KeeperError> {
        let id = self.id;
        self.run("exists", |state, _| {
            let stat = state.nodes.get(path).map(|node| node.stat);
            ServiceState::watch(&mut state.data_watches, id, path, watch);
            Ok(stat)
        })
    }

    async fn get(&self, path: &str, watch: Option<Watcher>) -> Result<(Vec<u8>, Stat), KeeperError> {
        let id = self.id;
        self.run("get", |state, _| {
            let node = state.node(path)?;
            let result = (node.data.clone(), node.stat);
            ServiceState::watch(&mut state.data_watches, id, path, watch);
            Ok(result)
        })
    }

    async fn set(&self, path: &str, data: &[u8], version: Option<i32>) -> Result<Stat, KeeperError> {
        self.run("set", |state, fired| state.set(path, data, version, fired))
    }

    async fn get_children(&self, path: &str, watch: Option<Watcher>) -> Result<Vec<String>, KeeperError> {
        let id = self.id;
        self.run("get_children", |state, _| {
            state.node(path)?;
            let children = state.children(path);
            ServiceState::watch(&mut state.child_watches, id, path, watch);
            Ok(children)
        })
    }

    async fn get_acl(&self, path: &str) -> Result<(Vec<Acl>, Stat), KeeperError> {
        self.run("get_acl", |state, _| {
            let node = state.node(path)?;
            Ok((node.acl.clone(), node.stat))
        })
    }

    async fn set_acl(&self, path: &str, acl: &[Acl], version: Option<i32>) -> Result<Stat, KeeperError> {
        self.run("set_acl", |state, _| state.set_acl(path, acl, version))
    }

    async fn close(&self) -> Result<(), KeeperError> {
        let mut fired = Vec::new();
        {
            let mut state = self.state.lock();
            if let Some(err) = state.take_fault("close") {
                return Err(err);
            }
            if state.sessions.remove(&self.id).is_none() {
                return Err(KeeperError::SessionClosed);
            }
            state.drop_session_watches(self.id);
            state.remove_ephemerals(self.id, &mut fired);
        }
        debug!(session_id = self.id, "session closed");
        fire(fired);
        Ok(())
    }
}
