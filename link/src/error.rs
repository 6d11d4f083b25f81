//! Error types for pulse-link.
//!
//! A single [`LinkError`] covers both halves of the crate: connection-level
//! failures raised by the realtime hub and per-operation failures raised by
//! the bounded task processor.

use thiserror::Error;

/// Result type for pulse-link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that can occur in the realtime hub or the task processor.
///
/// The enum is `Clone` because one connection attempt can be awaited by
/// several `connect()` callers at once; each of them receives a copy of the
/// outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Token missing, malformed, expired, or rejected by the server.
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// Transient transport failure; drives reconnect with backoff.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// An invocation was attempted while the hub is not connected.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// The processor is at its concurrency ceiling.
    #[error("Concurrency limit exceeded ({active} active, limit {limit})")]
    ConcurrencyLimitExceeded { active: usize, limit: usize },

    /// The worker did not answer within the configured timeout.
    #[error("Operation {id} timed out after {timeout_ms}ms")]
    OperationTimeout { id: String, timeout_ms: u64 },

    /// The operation was abandoned through `cancel_all()`.
    #[error("Operation {id} cancelled")]
    OperationCancelled { id: String },

    /// The worker ran the operation and reported a failure.
    #[error("Operation {id} failed: {message}")]
    OperationFailed { id: String, message: String },

    /// The isolated worker crashed or could not handle the request.
    #[error("Worker fault: {0}")]
    WorkerFault(String),

    /// A remote invocation did not complete in time.
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// The server answered an invocation with an error.
    #[error("Remote error: {0}")]
    RemoteError(String),

    /// Invalid endpoint, options, or configuration file.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl LinkError {
    /// `true` for errors that must stop automatic reconnection.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthenticationError(_))
    }

    /// `true` for errors the caller may reasonably retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_)
                | Self::ConcurrencyLimitExceeded { .. }
                | Self::OperationTimeout { .. }
                | Self::TimeoutError(_)
        )
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<url::ParseError> for LinkError {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigurationError(format!("Invalid URL: {}", err))
    }
}

impl From<toml::de::Error> for LinkError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigurationError(format!("Invalid configuration file: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_classification() {
        assert!(LinkError::AuthenticationError("expired".into()).is_auth_failure());
        assert!(!LinkError::NetworkError("reset".into()).is_auth_failure());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(LinkError::NetworkError("reset".into()).is_retryable());
        assert!(LinkError::ConcurrencyLimitExceeded { active: 2, limit: 2 }.is_retryable());
        assert!(!LinkError::OperationCancelled { id: "op_1".into() }.is_retryable());
        assert!(!LinkError::AuthenticationError("bad".into()).is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = LinkError::OperationTimeout {
            id: "op_7".into(),
            timeout_ms: 100,
        };
        assert_eq!(err.to_string(), "Operation op_7 timed out after 100ms");
    }
}
