//! Test support for the keeper crates.
//!
//! - [`DeterministicCoordinationService`] - in-memory backing service with fault injection
//! - [`init_tracing`] - install a test subscriber once per test binary

mod service;

use keeper_session::SessionConfig;
pub use service::AuthBehavior;
pub use service::DeterministicCoordinationService;
use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

/// Session configuration tuned for the in-memory service: short timeouts and
/// a fast retry loop.
pub fn test_config() -> SessionConfig {
    let mut config = SessionConfig::new(["mem:2181"]);
    config.connect_timeout_ms = 200;
    config.session_timeout_ms = 3_000;
    config.retry.delay_ms = 5;
    config
}
