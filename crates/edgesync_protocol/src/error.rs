//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or validating protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The record type is not declared in the schema registry.
    #[error("unknown record type: {0}")]
    UnknownRecordType(String),

    /// The payload carries a field the record type does not declare.
    #[error("unknown field {field:?} for record type {record_type}")]
    UnknownField {
        /// Record type.
        record_type: String,
        /// Offending field name.
        field: String,
    },

    /// A field value could not be decoded.
    #[error("invalid value for {record_type}.{field}: {reason}")]
    InvalidField {
        /// Record type.
        record_type: String,
        /// Field name.
        field: String,
        /// Why the decoder rejected it.
        reason: String,
    },

    /// Unknown operation name.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Unknown conflict policy name.
    #[error("unknown conflict policy: {0}")]
    UnknownPolicy(String),

    /// Unknown field kind in a schema declaration.
    #[error("unknown field kind: {0}")]
    UnknownFieldKind(String),

    /// Version numbers start at 1.
    #[error("invalid version {0}: versions are positive")]
    InvalidVersion(u64),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
