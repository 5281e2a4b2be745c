use crate::record::CorrelationId;

/// All errors that can be returned by a LedgerStorage implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// No record with the given correlation id exists in the canonical store.
    #[error("resource record not found: {correlation_id}")]
    RecordNotFound { correlation_id: CorrelationId },

    /// A record with this correlation id is already present.
    #[error("duplicate correlation id: {correlation_id}")]
    DuplicateId { correlation_id: CorrelationId },

    /// The record carries the tombstone flag; no further mutation is allowed.
    #[error("resource record already deleted: {correlation_id}")]
    AlreadyDeleted { correlation_id: CorrelationId },

    /// The mutation is not valid for the record's current flags.
    #[error("invalid transition for record {correlation_id}: {message}")]
    InvalidTransition {
        correlation_id: CorrelationId,
        message: String,
    },

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
