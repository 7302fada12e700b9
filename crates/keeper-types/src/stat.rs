//! Node metadata.

use serde::Deserialize;
use serde::Serialize;

/// Statistics about a node, similar to the UNIX `stat` structure.
///
/// Every change to the namespace receives a transaction id (zxid); comparing
/// zxids gives the total order of changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Transaction that created the node.
    pub czxid: i64,
    /// Transaction that last modified the node's data.
    pub mzxid: i64,
    /// Creation time, milliseconds since epoch.
    pub ctime: i64,
    /// Last modification time, milliseconds since epoch.
    pub mtime: i64,
    /// Number of data changes.
    pub version: i32,
    /// Number of children changes.
    pub cversion: i32,
    /// Number of ACL changes.
    pub aversion: i32,
    /// Owning session id for ephemeral nodes, 0 otherwise.
    pub ephemeral_owner: i64,
    /// Length of the data field.
    pub data_length: i32,
    /// Number of children.
    pub num_children: i32,
    /// Transaction that last modified the children.
    pub pzxid: i64,
}

impl Stat {
    /// Returns true if the node belongs to a session.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}
