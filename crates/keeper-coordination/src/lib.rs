//! Lock and queue recipes over a session-based coordination service.
//!
//! - [`DistributedLock`] - mutual exclusion with FIFO hand-over between waiters
//! - [`DistributedQueue`] - FIFO queue with optional blocking pop
//!
//! Both recipes are bound to a [`keeper_session::SessionConnection`] and a
//! parent path that must already exist. Pure ordering logic lives in
//! [`verified`].
//!
//! ## Lock Example
//!
//! ```ignore
//! use keeper_coordination::{DistributedLock, NoopListener};
//!
//! let lock = DistributedLock::new(session.clone(), "/app/locks", Arc::new(NoopListener)).await?;
//! if !lock.acquire().await? {
//!     lock.subscribe().wait_for(|status| status.is_held()).await?;
//! }
//! // critical section
//! lock.release().await?;
//! ```
//!
//! ## Queue Example
//!
//! ```ignore
//! use keeper_coordination::DistributedQueue;
//!
//! let queue = DistributedQueue::new(session, "/app/jobs").await?;
//! queue.push(b"resize:42").await?;
//! while let Some(job) = queue.pop().await? {
//!     handle(job);
//! }
//! ```

mod error;
mod lock;
mod queue;
pub mod verified;

pub use error::CoordinationError;
pub use lock::DistributedLock;
pub use lock::LockListener;
pub use lock::LockStatus;
pub use lock::NoopListener;
pub use queue::DistributedQueue;
