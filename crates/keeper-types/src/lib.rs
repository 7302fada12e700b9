//! Shared vocabulary for the keeper coordination recipes.
//!
//! - [`SessionState`], [`EventType`], [`CreateMode`] - closed enumerations with the
//!   service's numeric codes
//! - [`Acl`], [`Id`], [`Permission`], [`Scheme`] - access control entries and presets
//! - [`Stat`] - node metadata
//! - [`WatchedEvent`], [`Watcher`] - one-shot watch notifications
//! - [`KeeperError`] - errors reported by the backing client
//! - [`path`] - namespace path helpers
//! - [`constants`] - fixed bounds and defaults

mod acl;
pub mod constants;
mod error;
pub mod path;
mod stat;
mod state;
mod watch;

pub use acl::Acl;
pub use acl::Id;
pub use acl::Permission;
pub use acl::Scheme;
pub use error::KeeperError;
pub use stat::Stat;
pub use state::CreateMode;
pub use state::EventType;
pub use state::SessionState;
pub use watch::WatchedEvent;
pub use watch::Watcher;
