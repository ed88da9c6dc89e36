//! Error types for backend and credential operations.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by a sync backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend rejected the presented credentials.
    #[error("authentication rejected: {message}")]
    AuthRejected {
        /// Backend-reported reason.
        message: String,
    },

    /// Network or transport failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// An open replica already exists in this process.
    #[error("replica already open at {path}")]
    ReplicaAlreadyOpen {
        /// Path of the currently open replica.
        path: PathBuf,
    },

    /// Another process holds the replica file lock.
    #[error("replica file locked by another process: {path}")]
    ReplicaLocked {
        /// Path of the locked replica file.
        path: PathBuf,
    },

    /// The operation needs an open replica.
    #[error("replica is closed")]
    ReplicaClosed,

    /// The identity handle is not known to the backend.
    #[error("unknown identity: {id}")]
    UnknownIdentity {
        /// The unknown identity id.
        id: Uuid,
    },

    /// The identity exists but holds no live session.
    #[error("identity is not logged in")]
    IdentityNotActive,

    /// The restore source file does not exist.
    #[error("restore source not found: {path}")]
    RestoreSourceMissing {
        /// The missing snapshot path.
        path: PathBuf,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Replica payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl BackendError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Transport {
                retryable: true,
                ..
            }
        )
    }
}

/// Errors reported by a credential source.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The token endpoint could not be reached.
    #[error("token endpoint unreachable: {0}")]
    Transport(String),

    /// The token endpoint rejected the request.
    #[error("token request rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(BackendError::transport_retryable("connection reset").is_retryable());
        assert!(!BackendError::transport_fatal("bad certificate").is_retryable());
        assert!(!BackendError::ReplicaClosed.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = BackendError::AuthRejected {
            message: "token expired".into(),
        };
        assert_eq!(err.to_string(), "authentication rejected: token expired");
    }
}
