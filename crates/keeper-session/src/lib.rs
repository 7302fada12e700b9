//! Session handling for the keeper coordination recipes.
//!
//! - [`SessionConnection`] - one session, its global watch fan-out and node operations
//! - [`RetryPolicy`] - bounded retry of operations that hit connection loss
//! - [`GlobalWatcherSet`] - snapshot-dispatched observers of session events
//! - [`CoordinationClient`] / [`Connector`] - the backing-client interface
//! - [`SessionConfig`] - TOML-loadable configuration
//!
//! ## Example
//!
//! ```ignore
//! use keeper_session::{SessionConfig, SessionConnection};
//!
//! let config = SessionConfig::from_file("keeper.toml")?;
//! let session = SessionConnection::connect(&connector, config).await?;
//! session.add_global_watcher(|event| tracing::info!(state = %event.state, "session event"));
//! ```

mod client;
mod config;
mod connection;
mod retry;
mod watchers;

pub use client::AuthCallback;
pub use client::Connector;
pub use client::CoordinationClient;
pub use client::SessionEventSender;
pub use config::ConfigError;
pub use config::RetryConfig;
pub use config::SessionConfig;
pub use connection::SessionConnection;
pub use retry::RetryClass;
pub use retry::RetryPolicy;
pub use retry::Retryable;
pub use watchers::GlobalWatcher;
pub use watchers::GlobalWatcherSet;
pub use watchers::WatcherId;
