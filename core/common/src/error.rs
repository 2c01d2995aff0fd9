//! Common error types for offsync.

use thiserror::Error;

/// Top-level error type for offsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Persistent store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote exchange failed at the transport level.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote exchange did not complete within its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Remote authority answered with something we cannot interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the failure came from talking to the remote authority.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_) | Error::Protocol(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(Error::Network("reset".to_string()).is_transport());
        assert!(Error::Timeout("5s".to_string()).is_transport());
        assert!(Error::Protocol("bad json".to_string()).is_transport());
        assert!(!Error::Storage("disk full".to_string()).is_transport());
        assert!(!Error::Config("batch_size".to_string()).is_transport());
    }
}
