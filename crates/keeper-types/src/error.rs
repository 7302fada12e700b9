//! Error types returned by the backing coordination-service client.

use snafu::Snafu;

use crate::state::SessionState;

/// Errors reported by a backing coordination-service session.
///
/// The variants mirror the result codes of the coordination service. Recipes
/// distinguish three groups:
///
/// - transient: [`KeeperError::ConnectionLoss`], retried by the retry policy
/// - fatal: [`KeeperError::SessionExpired`], never retried
/// - races: [`KeeperError::NoNode`], [`KeeperError::NodeExists`], [`KeeperError::BadVersion`],
///   absorbed locally by the lock and queue recipes
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum KeeperError {
    /// Connection to the service was lost; the session may still be alive.
    #[snafu(display("connection lost during {operation}"))]
    ConnectionLoss {
        /// Operation that was in flight.
        operation: String,
    },

    /// The session expired; every ephemeral node and watch it owned is gone.
    #[snafu(display("session expired"))]
    SessionExpired,

    /// The session handle was closed by this client.
    #[snafu(display("session is closed"))]
    SessionClosed,

    /// The node does not exist.
    #[snafu(display("node '{path}' does not exist"))]
    NoNode {
        /// Path of the missing node.
        path: String,
    },

    /// A node already exists at the path.
    #[snafu(display("node '{path}' already exists"))]
    NodeExists {
        /// Path of the existing node.
        path: String,
    },

    /// The expected version did not match the node's version.
    #[snafu(display("version mismatch on '{path}': expected {expected}"))]
    BadVersion {
        /// Path of the node.
        path: String,
        /// Version the caller expected.
        expected: i32,
    },

    /// The node has children and cannot be deleted.
    #[snafu(display("node '{path}' has children"))]
    NotEmpty {
        /// Path of the node.
        path: String,
    },

    /// The session lacks permission for the operation.
    #[snafu(display("not authorized for '{path}'"))]
    NoAuth {
        /// Path of the node.
        path: String,
    },

    /// Authentication was rejected by the service.
    #[snafu(display("authentication failed for scheme '{scheme}'"))]
    AuthFailed {
        /// Scheme that was rejected.
        scheme: String,
    },

    /// An argument was malformed (bad path, bad credentials, unknown code).
    #[snafu(display("invalid argument: {reason}"))]
    InvalidArgument {
        /// What was wrong.
        reason: String,
    },

    /// The session never reached the connected state.
    #[snafu(display("unable to connect to {} (state: {state})", servers.join(" or ")))]
    ConnectFailed {
        /// Servers that were tried.
        servers: Vec<String>,
        /// State observed when giving up.
        state: SessionState,
    },

    /// A bounded wait elapsed.
    #[snafu(display("operation timed out: {operation}"))]
    Timeout {
        /// Description of the operation.
        operation: String,
    },
}

impl KeeperError {
    /// Returns true for transient connectivity failures.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, KeeperError::ConnectionLoss { .. })
    }

    /// Returns true if the session is gone for good.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, KeeperError::SessionExpired)
    }

    /// Returns true if the error reports a missing node.
    pub fn is_no_node(&self) -> bool {
        matches!(self, KeeperError::NoNode { .. })
    }

    /// Returns true if the error reports an existing node.
    pub fn is_node_exists(&self) -> bool {
        matches!(self, KeeperError::NodeExists { .. })
    }

    /// Returns true if the error reports a version mismatch.
    pub fn is_bad_version(&self) -> bool {
        matches!(self, KeeperError::BadVersion { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failed_lists_servers() {
        let err = KeeperError::ConnectFailed {
            servers: vec!["zk1:2181".to_string(), "zk2:2181".to_string()],
            state: SessionState::Connecting,
        };
        assert_eq!(err.to_string(), "unable to connect to zk1:2181 or zk2:2181 (state: connecting)");
    }

    #[test]
    fn classification_helpers() {
        let loss = KeeperError::ConnectionLoss {
            operation: "get".to_string(),
        };
        assert!(loss.is_connection_loss());
        assert!(!loss.is_session_expired());
        assert!(KeeperError::SessionExpired.is_session_expired());
        assert!(KeeperError::NoNode { path: "/a".into() }.is_no_node());
        assert!(
            KeeperError::BadVersion {
                path: "/a".into(),
                expected: 3
            }
            .is_bad_version()
        );
    }
}
