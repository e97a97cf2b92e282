//! Error types for the weave sync engine

use thiserror::Error;

/// Main error type for weave operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Credentials rejected or identity session expired
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Record HMAC did not verify
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code
        status: u16,
        /// Response body (possibly truncated by the server)
        body: String,
    },

    /// Server answered 304 where fresh data was expected
    #[error("Not modified: {0}")]
    NotModified(String),

    /// Connection, TLS or timeout failure
    #[error("Network error: {0}")]
    Network(String),

    /// A single record could not be decoded
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// The account uses per-collection key bundles
    #[error("Per-collection key bundles are not supported ({0} collections)")]
    UnsupportedKeyBundle(usize),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Error reported by a local places store
    #[error("Places error: {0}")]
    Places(String),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Coarse classification used to decide how far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Abort the whole run and drop the session
    Authentication,
    /// Abort the collection being processed
    Integrity,
    /// Abort the current push/pull, keep the checkpoint
    Transport,
    /// Skip one record
    MalformedRecord,
    /// Local storage, configuration or programming error
    Local,
}

impl SyncError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Authentication(_) => ErrorKind::Authentication,
            SyncError::Integrity(_) => ErrorKind::Integrity,
            SyncError::Http { .. } | SyncError::NotModified(_) | SyncError::Network(_) => {
                ErrorKind::Transport
            }
            SyncError::MalformedRecord(_) => ErrorKind::MalformedRecord,
            _ => ErrorKind::Local,
        }
    }

    /// Build an HTTP error, mapping 401/403 to [`SyncError::Authentication`].
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => SyncError::Authentication(format!("HTTP {}: {}", status, body)),
            304 => SyncError::NotModified(body),
            _ => SyncError::Http { status, body },
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => SyncError::from_status(status.as_u16(), err.to_string()),
            None => SyncError::Network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::Http {
            status: 503,
            body: "backend unavailable".to_string(),
        };
        assert_eq!(format!("{}", err), "HTTP 503: backend unavailable");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let sync_err: SyncError = io_err.into();
        assert!(matches!(sync_err, SyncError::Io(_)));
        assert_eq!(sync_err.kind(), ErrorKind::Local);
    }

    #[test]
    fn test_from_status_classification() {
        assert_eq!(
            SyncError::from_status(401, "nope").kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            SyncError::from_status(403, "nope").kind(),
            ErrorKind::Authentication
        );
        assert!(matches!(
            SyncError::from_status(304, ""),
            SyncError::NotModified(_)
        ));
        assert_eq!(SyncError::from_status(500, "boom").kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_integrity_and_malformed_kinds() {
        assert_eq!(
            SyncError::Integrity("hmac".into()).kind(),
            ErrorKind::Integrity
        );
        assert_eq!(
            SyncError::MalformedRecord("json".into()).kind(),
            ErrorKind::MalformedRecord
        );
    }
}
