//! Pure functions behind the lock and queue recipes.
//!
//! Everything here is deterministic and free of I/O: sibling ordering, neighbor
//! selection and node naming. The recipes in [`crate::lock`] and
//! [`crate::queue`] call into these after listing children.

pub mod lock;
pub mod queue;

pub use lock::LockPosition;
pub use lock::SiblingOrder;
pub use lock::find_own_node;
pub use lock::lock_node_prefix;
pub use lock::lock_position;
pub use lock::order_siblings;
pub use queue::order_items;
