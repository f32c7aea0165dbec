//! Error types for the sync server.

use edgesync_engine::SyncError;
use edgesync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or invalid bearer token.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The caller is authenticated but the node does not serve the request.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// No route for the requested path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed wire message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The engine refused or failed the operation.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Protocol(_) => 400,
            ServerError::AuthenticationFailed(_) => 401,
            ServerError::NotAuthorized(_) => 403,
            ServerError::NotFound(_) => 404,
            ServerError::Sync(e) => match e {
                SyncError::Protocol(_)
                | SyncError::InvalidResolution(_)
                | SyncError::InvalidConfig(_) => 400,
                SyncError::RecordNotFound { .. }
                | SyncError::UnknownEntry(_)
                | SyncError::UnknownPeer(_) => 404,
                SyncError::RecordExists { .. }
                | SyncError::NotInConflict { .. }
                | SyncError::AlreadySyncing(_) => 409,
                _ => 500,
            },
            ServerError::Internal(_) | ServerError::Io(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Short machine-readable kind used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self.status_code() {
            400 => "bad_request",
            401 => "unauthorized",
            403 => "forbidden",
            404 => "not_found",
            409 => "conflict",
            _ => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgesync_protocol::RecordId;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::AuthenticationFailed("no token".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::NotAuthorized("local node".into()).is_server_error());
    }

    #[test]
    fn engine_errors_map_to_statuses() {
        let missing = ServerError::from(SyncError::RecordNotFound {
            record_type: "inventory.product".into(),
            record_id: RecordId::from("7"),
        });
        assert_eq!(missing.status_code(), 404);
        assert_eq!(missing.kind(), "not_found");

        let storage = ServerError::from(SyncError::Storage("disk full".into()));
        assert_eq!(storage.status_code(), 500);

        let unknown = ServerError::from(ProtocolError::UnknownRecordType("x.y".into()));
        assert_eq!(unknown.status_code(), 400);
    }
}
