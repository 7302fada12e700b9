//! Session configuration.
//!
//! Loaded from TOML with defaults for every field except the server list.
//!
//! ```toml
//! servers = ["zk1:2181", "zk2:2181"]
//! connect_timeout_ms = 5000
//!
//! [retry]
//! max_attempts = 5
//! delay_ms = 250
//! ```

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

/// Default values for configuration.
mod defaults {
    use keeper_types::constants::CLOSE_ATTEMPTS;
    use keeper_types::constants::DEFAULT_CONNECT_TIMEOUT_MS;
    use keeper_types::constants::DEFAULT_RETRY_ATTEMPTS;
    use keeper_types::constants::DEFAULT_RETRY_DELAY_MS;
    use keeper_types::constants::DEFAULT_SESSION_TIMEOUT_MS;

    pub fn connect_timeout_ms() -> u64 {
        DEFAULT_CONNECT_TIMEOUT_MS
    }
    pub fn session_timeout_ms() -> u64 {
        DEFAULT_SESSION_TIMEOUT_MS
    }
    pub fn close_attempts() -> u32 {
        CLOSE_ATTEMPTS
    }
    pub fn retry_attempts() -> u32 {
        DEFAULT_RETRY_ATTEMPTS
    }
    pub fn retry_delay_ms() -> u64 {
        DEFAULT_RETRY_DELAY_MS
    }
}

/// Errors loading or validating configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The TOML did not parse.
    #[snafu(display("failed to parse config: {source}"))]
    Parse {
        /// Underlying parse error.
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[snafu(display("invalid config: {reason}"))]
    Invalid {
        /// What was wrong.
        reason: String,
    },
}

/// Retry behaviour for operations that hit connection loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before the failure is surfaced.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::retry_attempts(),
            delay_ms: defaults::retry_delay_ms(),
        }
    }
}

/// Configuration of a [`SessionConnection`](crate::SessionConnection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Servers to connect to, `host:port`.
    pub servers: Vec<String>,
    /// Time allowed to reach the connected state.
    #[serde(default = "defaults::connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Session timeout requested from the service.
    #[serde(default = "defaults::session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// Attempts made when closing the session.
    #[serde(default = "defaults::close_attempts")]
    pub close_attempts: u32,
    /// Retry policy for recipe operations.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl SessionConfig {
    /// Configuration for `servers` with default timeouts.
    pub fn new(servers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            connect_timeout_ms: defaults::connect_timeout_ms(),
            session_timeout_ms: defaults::session_timeout_ms(),
            close_attempts: defaults::close_attempts(),
            retry: RetryConfig::default(),
        }
    }

    /// Configuration for a comma separated server list, e.g. `"zk1:2181, zk2:2181"`.
    pub fn with_servers_str(servers: &str) -> Self {
        Self::new(servers.split(',').map(str::trim).filter(|s| !s.is_empty()))
    }

    /// Parse and validate TOML.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut config: SessionConfig = toml::from_str(contents).context(ParseSnafu)?;
        config.servers = config.servers.iter().map(|s| s.trim().to_string()).collect();
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::from_toml_str(&contents)
    }

    /// Check values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() || self.servers.iter().any(|s| s.is_empty()) {
            return InvalidSnafu {
                reason: "at least one non-empty server is required",
            }
            .fail();
        }
        if self.connect_timeout_ms == 0 {
            return InvalidSnafu {
                reason: "connect_timeout_ms must be positive",
            }
            .fail();
        }
        if self.close_attempts == 0 || self.retry.max_attempts == 0 {
            return InvalidSnafu {
                reason: "attempt counts must be positive",
            }
            .fail();
        }
        Ok(())
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Session timeout as a duration.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = SessionConfig::from_toml_str(r#"servers = ["zk1:2181"]"#).unwrap();
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.close_attempts, 3);
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn nested_retry_section() {
        let config = SessionConfig::from_toml_str(
            r#"
            servers = [" zk1:2181 ", "zk2:2181"]
            connect_timeout_ms = 2000

            [retry]
            max_attempts = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.servers, vec!["zk1:2181", "zk2:2181"]);
        assert_eq!(config.connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.delay_ms, 500);
    }

    #[test]
    fn empty_server_list_is_rejected() {
        let err = SessionConfig::from_toml_str("servers = []").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn zero_retry_attempts_rejected() {
        let err = SessionConfig::from_toml_str(
            r#"
            servers = ["zk1:2181"]
            [retry]
            max_attempts = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = SessionConfig::from_toml_str("servers = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn comma_separated_servers() {
        let config = SessionConfig::with_servers_str("zk1:2181, zk2:2181,,");
        assert_eq!(config.servers, vec!["zk1:2181", "zk2:2181"]);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"servers = ["localhost:2181"]"#).unwrap();
        let config = SessionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.servers, vec!["localhost:2181"]);

        let missing = SessionConfig::from_file("/nonexistent/keeper.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::ReadFile { .. }));
    }
}
