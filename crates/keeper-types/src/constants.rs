//! Fixed limits and defaults shared across keeper crates.
//!
//! Every loop that talks to the service has an explicit bound defined here.

/// Attempts made by the default retry policy.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 10;

/// Delay between retry attempts in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Attempts made when closing a session.
pub const CLOSE_ATTEMPTS: u32 = 3;

/// Default time allowed for a session to reach the connected state.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default session timeout negotiated with the service.
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 10_000;

/// Iterations of the lock acquisition loop before giving up.
pub const MAX_LOCK_ACQUIRE_ITERATIONS: u32 = 10;

/// Digits of the service-assigned sequence suffix.
pub const SEQUENCE_DIGITS: usize = 10;

/// Name prefix of lock nodes.
pub const LOCK_NODE_PREFIX: &str = "lock";

/// Name prefix of queue item nodes.
pub const QUEUE_ITEM_PREFIX: &str = "item-";
