//! CBOR codec between typed records and the backend's raw payloads.

use crate::models::Record;
use storesync_backend::{BackendError, RawRecord, RecordKind};
use thiserror::Error;

/// Result type for record operations.
pub type RecordsResult<T> = Result<T, RecordsError>;

/// Errors from record encoding, decoding, or backend access.
#[derive(Debug, Error)]
pub enum RecordsError {
    /// Record could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Payload could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A payload of the wrong record type was presented.
    #[error("record kind mismatch: expected {expected:?}, got {actual:?}")]
    KindMismatch {
        /// The type the caller asked for.
        expected: RecordKind,
        /// The type the payload carries.
        actual: RecordKind,
    },

    /// Backend error during a read or write.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Encodes a typed record into a raw backend record.
pub fn encode<R: Record>(record: &R) -> RecordsResult<RawRecord> {
    let mut payload = Vec::new();
    ciborium::into_writer(record, &mut payload).map_err(|e| RecordsError::Encode(e.to_string()))?;
    Ok(RawRecord {
        kind: R::KIND,
        id: record.record_id(),
        payload,
    })
}

/// Decodes a raw backend record into its typed form.
pub fn decode<R: Record>(raw: &RawRecord) -> RecordsResult<R> {
    if raw.kind != R::KIND {
        return Err(RecordsError::KindMismatch {
            expected: R::KIND,
            actual: raw.kind,
        });
    }
    ciborium::from_reader(raw.payload.as_slice()).map_err(|e| RecordsError::Decode(e.to_string()))
}
