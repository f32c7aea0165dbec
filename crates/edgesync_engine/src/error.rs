//! Error types for the sync engine.

use edgesync_protocol::{ProtocolError, RecordId};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The peer call did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// The peer answered with a 5xx status.
    #[error("server error: {0}")]
    ServerError(String),

    /// The peer rejected our credentials or role.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Malformed message, unknown record type or invalid field.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Another pass against the same peer holds the lock.
    #[error("peer {0} is already syncing")]
    AlreadySyncing(String),

    /// No peer is configured under this key.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// Sync is disabled for this node.
    #[error("sync is not enabled")]
    SyncDisabled,

    /// Configuration value is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No orchestrator is attached.
    #[error("no peers configured")]
    NoPeers,

    /// Journal entry does not exist.
    #[error("unknown journal entry: {0}")]
    UnknownEntry(u64),

    /// The record does not exist (or is soft-deleted).
    #[error("record not found: {record_type}/{record_id}")]
    RecordNotFound {
        /// Record type.
        record_type: String,
        /// Record identifier.
        record_id: RecordId,
    },

    /// A live record with this identifier already exists.
    #[error("record already exists: {record_type}/{record_id}")]
    RecordExists {
        /// Record type.
        record_type: String,
        /// Record identifier.
        record_id: RecordId,
    },

    /// The record is not in `conflict` status.
    #[error("record is not in conflict: {record_type}/{record_id}")]
    NotInConflict {
        /// Record type.
        record_type: String,
        /// Record identifier.
        record_id: RecordId,
    },

    /// Conflict resolution could not be carried out.
    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    /// State could not be stored or loaded.
    #[error("storage error: {0}")]
    Storage(String),

    /// Another process holds the state file.
    #[error("node state in use: {0} is locked by another process")]
    StateLocked(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while persisting state.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
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

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            SyncError::AlreadySyncing(_) => true,
            SyncError::Io(_) => true,
            _ => false,
        }
    }

    /// Returns true for errors raised by the transport layer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::Transport { .. }
                | SyncError::Timeout
                | SyncError::ServerError(_)
                | SyncError::AuthenticationFailed(_)
        )
    }
}
