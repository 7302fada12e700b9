//! Error types for the lock and queue recipes.

use keeper_session::RetryClass;
use keeper_session::Retryable;
use keeper_types::KeeperError;
use snafu::Snafu;

/// Errors from coordination recipes.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordinationError {
    /// The backing service reported an error.
    #[snafu(display("coordination service error: {source}"))]
    Keeper {
        /// The underlying error.
        source: KeeperError,
    },

    /// The recipe's parent path does not exist.
    #[snafu(display("path '{path}' must exist before a recipe can use it"))]
    MissingPath {
        /// The missing path.
        path: String,
    },

    /// The lock could neither be acquired nor watched.
    #[snafu(display("lock '{path}' neither acquired nor watched after {attempts} attempts"))]
    AcquisitionExhausted {
        /// Lock path.
        path: String,
        /// Iterations made.
        attempts: u32,
    },

    /// A bounded wait elapsed.
    #[snafu(display("operation timed out: {operation}"))]
    Timeout {
        /// Description of the operation.
        operation: String,
    },
}

impl From<KeeperError> for CoordinationError {
    fn from(source: KeeperError) -> Self {
        CoordinationError::Keeper { source }
    }
}

impl Retryable for CoordinationError {
    fn retry_class(&self) -> RetryClass {
        match self {
            CoordinationError::Keeper { source } => source.retry_class(),
            _ => RetryClass::Permanent,
        }
    }
}

impl CoordinationError {
    /// Returns true if the session behind the recipe expired.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, CoordinationError::Keeper { source } if source.is_session_expired())
    }

    /// Returns true for transient connectivity failures.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, CoordinationError::Keeper { source } if source.is_connection_loss())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeper_errors_keep_their_retry_class() {
        let loss: CoordinationError = KeeperError::ConnectionLoss {
            operation: "create".to_string(),
        }
        .into();
        assert_eq!(loss.retry_class(), RetryClass::Transient);
        assert!(loss.is_connection_loss());

        let expired: CoordinationError = KeeperError::SessionExpired.into();
        assert_eq!(expired.retry_class(), RetryClass::SessionExpired);
        assert!(expired.is_session_expired());
    }

    #[test]
    fn recipe_errors_are_permanent() {
        let exhausted = CoordinationError::AcquisitionExhausted {
            path: "/locks".to_string(),
            attempts: 10,
        };
        assert_eq!(exhausted.retry_class(), RetryClass::Permanent);
        assert_eq!(exhausted.to_string(), "lock '/locks' neither acquired nor watched after 10 attempts");
    }
}
