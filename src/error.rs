//! Error types for the load advisor.

use thiserror::Error;

/// Result type alias for advisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the load advisor.
#[derive(Error, Debug)]
pub enum Error {
    /// A status failed validation before it could be published.
    #[error("invalid status: {0}")]
    InvalidStatus(String),

    /// A stored status record could not be decoded.
    #[error("corrupt status record: {0}")]
    Corrupt(String),

    /// Storage backend errors.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors, rejected at construction.
    #[error("config error: {0}")]
    Config(String),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Storage backend errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error from the Redis client.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Error from the ZooKeeper client.
    #[error("zookeeper error: {0}")]
    Zookeeper(#[from] zookeeper_client::Error),

    /// Session establishment kept failing and the backend gave up.
    ///
    /// This is permanent: every subsequent operation on the backend
    /// returns this error without retrying.
    #[error("connection failed permanently after {attempts} consecutive attempts")]
    ConnectionFailed { attempts: u32 },

    /// The backend has been stopped.
    #[error("storage backend is stopped")]
    Stopped,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Corrupt(e.to_string())
    }
}

impl Error {
    /// Whether this error is permanent for its storage backend.
    ///
    /// Permanent errors must be surfaced to the caller as fatal; loops
    /// report everything else and continue.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::Storage(StorageError::ConnectionFailed { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_classification() {
        let err = Error::Storage(StorageError::ConnectionFailed { attempts: 11 });
        assert!(err.is_permanent());

        let err = Error::Storage(StorageError::Stopped);
        assert!(!err.is_permanent());

        let err = Error::InvalidStatus("a value must be provided".into());
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_display_includes_attempts() {
        let err = Error::Storage(StorageError::ConnectionFailed { attempts: 11 });
        assert!(err.to_string().contains("11"));
    }
}
