//! Closed enumerations shared by sessions, watches and node creation.
//!
//! Numeric codes match the coordination service's C client so values can be
//! passed through from a native binding unchanged.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::error::KeeperError;

/// Kind of change reported to a watch.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// The watch was removed without firing.
    NotWatching = -2,
    /// Session state changed; no node is involved.
    Session = -1,
    /// The watched node was created.
    NodeCreated = 1,
    /// The watched node was deleted.
    NodeDeleted = 2,
    /// The watched node's data changed.
    NodeDataChanged = 3,
    /// The watched node's children changed.
    NodeChildrenChanged = 4,
}

impl EventType {
    /// Convert the event type to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NotWatching => "not_watching",
            EventType::Session => "session",
            EventType::NodeCreated => "node_created",
            EventType::NodeDeleted => "node_deleted",
            EventType::NodeDataChanged => "node_data_changed",
            EventType::NodeChildrenChanged => "node_children_changed",
        }
    }
}

impl TryFrom<i32> for EventType {
    type Error = KeeperError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            -2 => Ok(EventType::NotWatching),
            -1 => Ok(EventType::Session),
            1 => Ok(EventType::NodeCreated),
            2 => Ok(EventType::NodeDeleted),
            3 => Ok(EventType::NodeDataChanged),
            4 => Ok(EventType::NodeChildrenChanged),
            other => Err(KeeperError::InvalidArgument {
                reason: format!("unknown event type code {other}"),
            }),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a session.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Not connected; reported by state queries only.
    Disconnected = 0,
    /// Trying to (re)establish a connection.
    Connecting = 1,
    /// Connection established, session being associated.
    Associating = 2,
    /// Connected and usable.
    Connected = 3,
    /// Authentication was rejected; the session is unusable.
    AuthFailed = -113,
    /// The session expired on the service.
    Expired = -112,
}

impl SessionState {
    /// Convert the state to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Associating => "associating",
            SessionState::Connected => "connected",
            SessionState::AuthFailed => "auth_failed",
            SessionState::Expired => "expired",
        }
    }

    /// Returns true for states the session can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::AuthFailed | SessionState::Expired)
    }
}

impl TryFrom<i32> for SessionState {
    type Error = KeeperError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(SessionState::Disconnected),
            1 => Ok(SessionState::Connecting),
            2 => Ok(SessionState::Associating),
            3 => Ok(SessionState::Connected),
            -113 => Ok(SessionState::AuthFailed),
            -112 => Ok(SessionState::Expired),
            other => Err(KeeperError::InvalidArgument {
                reason: format!("unknown session state code {other}"),
            }),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a node is created.
///
/// Bit 0 marks ephemeral nodes, bit 1 marks sequential nodes.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent = 0,
    /// Deleted when the creating session ends.
    Ephemeral = 1,
    /// Persistent, name suffixed with a service-assigned sequence number.
    PersistentSequential = 2,
    /// Ephemeral, name suffixed with a service-assigned sequence number.
    EphemeralSequential = 3,
}

impl CreateMode {
    /// Returns true if the node is removed with its session.
    pub fn is_ephemeral(&self) -> bool {
        (*self as i32) & 1 != 0
    }

    /// Returns true if the service appends a sequence suffix.
    pub fn is_sequential(&self) -> bool {
        (*self as i32) & 2 != 0
    }

    /// Convert the mode to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CreateMode::Persistent => "persistent",
            CreateMode::Ephemeral => "ephemeral",
            CreateMode::PersistentSequential => "persistent_sequential",
            CreateMode::EphemeralSequential => "ephemeral_sequential",
        }
    }
}

impl TryFrom<i32> for CreateMode {
    type Error = KeeperError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(CreateMode::Persistent),
            1 => Ok(CreateMode::Ephemeral),
            2 => Ok(CreateMode::PersistentSequential),
            3 => Ok(CreateMode::EphemeralSequential),
            other => Err(KeeperError::InvalidArgument {
                reason: format!("unknown create mode code {other}"),
            }),
        }
    }
}

impl fmt::Display for CreateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_codes_round_trip() {
        for state in [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::Associating,
            SessionState::Connected,
            SessionState::AuthFailed,
            SessionState::Expired,
        ] {
            assert_eq!(SessionState::try_from(state as i32).unwrap(), state);
        }
        assert!(SessionState::try_from(42).is_err());
    }

    #[test]
    fn event_type_codes_round_trip() {
        for event in [
            EventType::NotWatching,
            EventType::Session,
            EventType::NodeCreated,
            EventType::NodeDeleted,
            EventType::NodeDataChanged,
            EventType::NodeChildrenChanged,
        ] {
            assert_eq!(EventType::try_from(event as i32).unwrap(), event);
        }
        assert!(EventType::try_from(0).is_err());
    }

    #[test]
    fn create_mode_flags() {
        assert!(!CreateMode::Persistent.is_ephemeral());
        assert!(!CreateMode::Persistent.is_sequential());
        assert!(CreateMode::Ephemeral.is_ephemeral());
        assert!(CreateMode::PersistentSequential.is_sequential());
        assert!(!CreateMode::PersistentSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_sequential());
        assert_eq!(CreateMode::try_from(3).unwrap(), CreateMode::EphemeralSequential);
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Expired.is_terminal());
        assert!(SessionState::AuthFailed.is_terminal());
        assert!(!SessionState::Connecting.is_terminal());
    }
}
