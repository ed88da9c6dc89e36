//! Error types for the session lifecycle engine.

use storesync_backend::{BackendError, CredentialError};
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the session lifecycle engine.
///
/// Snapshot and retention failures never appear here: those subsystems are
/// best-effort and log instead of raising.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Token exchange or login was rejected. Surfaced to the caller and
    /// never retried automatically.
    #[error("authentication failed: {message}")]
    Auth {
        /// Backend-reported reason.
        message: String,
    },

    /// The credential source could not produce a token.
    #[error("credential fetch failed: {0}")]
    Credential(#[from] CredentialError),

    /// The replica could not be opened. Surfaced to the caller; the caller
    /// decides whether to retry.
    #[error("failed to open replica: {0}")]
    Open(#[source] BackendError),

    /// A synced open was requested without a logged-in session.
    #[error("no logged-in session")]
    NotLoggedIn,

    /// Offline mode was configured without a restore source path.
    #[error("offline mode requires a restore source path")]
    MissingRestoreSource,

    /// Any other backend failure.
    #[error(transparent)]
    Backend(#[from] BackendError),
}
