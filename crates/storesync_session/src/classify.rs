//! Sync error classification.
//!
//! The backend reports numeric protocol error codes. Only the range
//! matters for recovery policy: connection-level codes are transient and
//! the transport retries on its own, session-level codes invalidate the
//! session and trigger the re-open protocol, and anything outside the two
//! known ranges indicates a contract change on the backend side.

/// Semantic category of a backend sync error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection or protocol level (100..200): transient, log only.
    ConnectionOrProtocol,
    /// Session level (200..300): the session is no longer valid; full
    /// re-authentication is required.
    SessionExpired,
    /// Any other code: log at the highest severity and surface to
    /// operators, but take no automatic action.
    Unexpected,
}

/// Maps a raw backend error code to its category. Total over all codes.
pub fn classify(code: u16) -> ErrorCategory {
    match code {
        100..=199 => ErrorCategory::ConnectionOrProtocol,
        200..=299 => ErrorCategory::SessionExpired,
        _ => ErrorCategory::Unexpected,
    }
}
