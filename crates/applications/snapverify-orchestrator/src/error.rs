//! Error types for the backup verifier

use std::time::Duration;
use thiserror::Error;

/// Verifier result type
pub type Result<T> = std::result::Result<T, VerifyError>;

/// Failures raised by the gateway before any HTTP status is available
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within the HTTP timeout
    #[error("Request Timeout")]
    Timeout,

    /// Connection refused, reset, DNS failure, TLS failure, ...
    #[error("Request Failed: {0}")]
    Connection(String),
}

impl TransportError {
    /// Whether the retrying caller should repeat the request
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// How loudly an escalated error should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The run failed; the backup path could not be proven
    Fatal,
    /// The backup path returned different data than was written
    Critical,
}

/// Errors that abort a verification run
#[derive(Error, Debug)]
pub enum VerifyError {
    /// The cluster is not in a state where probe data may be written
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// A cluster call failed with a 5xx/unexpected status, a non-timeout
    /// transport error, or exhausted its timeout retries
    #[error(
        "{method} request to {target} failed (params: {parameters})\nResponse code: {}\nBody:\n{body}\n",
        .status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string())
    )]
    OperationFailed {
        /// HTTP method
        method: String,
        /// Request path
        target: String,
        /// Serialized request parameters
        parameters: String,
        /// Last HTTP status, if any response was received
        status: Option<u16>,
        /// Last response body or transport error
        body: String,
    },

    /// A snapshot or restore did not complete cleanly
    #[error("Snapshot {snapshot} failed (state: {state})\n{detail}")]
    SnapshotFailed {
        /// `repository/snapshot`
        snapshot: String,
        /// Last observed snapshot state
        state: String,
        /// Per-shard failure detail or raw response
        detail: String,
    },

    /// A bounded wait exceeded its deadline
    #[error("Timed out after {after:?} waiting for {waiting_for}")]
    Timeout {
        /// What the wait was for
        waiting_for: String,
        /// The deadline that was exceeded
        after: Duration,
    },

    /// Restored probe data differs from what was written
    #[error("Item {id} in test restore doesn't match.\nOriginal: {original}\nRestored: {restored}")]
    VerificationMismatch {
        /// Probe document id
        id: u64,
        /// Value read from the probe index
        original: String,
        /// Value read from the scratch restore index
        restored: String,
    },

    /// One or more expired repositories could not be deleted
    #[error("Failed to remove expired snapshot repositories: {}", .repositories.join(", "))]
    RetentionFailed {
        /// Repositories whose deletion failed
        repositories: Vec<String>,
    },

    /// The cluster answered, but not in the shape we expected
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client error (outside of request execution)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VerifyError {
    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an unexpected-response error
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::UnexpectedResponse(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(waiting_for: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            waiting_for: waiting_for.into(),
            after,
        }
    }

    /// Severity used for logging and alert titles
    pub fn severity(&self) -> Severity {
        match self {
            Self::VerificationMismatch { .. } => Severity::Critical,
            _ => Severity::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_failed_message_carries_diagnostics() {
        let err = VerifyError::OperationFailed {
            method: "GET".to_string(),
            target: "_snapshot/03-2024".to_string(),
            parameters: "{\"foo\":\"bar\"}".to_string(),
            status: Some(500),
            body: "ERROR REPLY BODY".to_string(),
        };

        assert_eq!(
            err.to_string(),
            "GET request to _snapshot/03-2024 failed (params: {\"foo\":\"bar\"})\n\
             Response code: 500\nBody:\nERROR REPLY BODY\n"
        );
    }

    #[test]
    fn test_severity() {
        let mismatch = VerifyError::VerificationMismatch {
            id: 1,
            original: "a".to_string(),
            restored: "b".to_string(),
        };
        assert_eq!(mismatch.severity(), Severity::Critical);
        assert_eq!(
            VerifyError::timeout("snapshot", Duration::from_secs(1)).severity(),
            Severity::Fatal
        );
    }

    #[test]
    fn test_transport_timeout_classification() {
        assert!(TransportError::Timeout.is_timeout());
        assert!(!TransportError::Connection("refused".to_string()).is_timeout());
    }
}
