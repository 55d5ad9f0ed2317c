// crates/sync-engine/src/error.rs
//! Error types for sync operations

use crate::remote::RemoteError;
use lotkeeper_core::AppError;
use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store or queue failure
    #[error(transparent)]
    Store(#[from] AppError),

    /// Remote call failure that ended a phase
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Remote service could not be reached before any successful call
    #[error("Remote service unreachable: {0}")]
    Offline(String),

    /// A cycle is already running on this engine
    #[error("Sync already in progress")]
    InProgress,

    /// Conflict id unknown or already resolved
    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    /// Wire data that cannot become a parking entry
    #[error("Invalid sync data: {0}")]
    InvalidData(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

impl SyncError {
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Store(inner) => inner,
            SyncError::Remote(remote) => remote.into_app_error("sync"),
            SyncError::Offline(message) => AppError::TransientRemoteFailure {
                operation: "connectivity".to_string(),
                message,
            },
            SyncError::InProgress => AppError::TransientRemoteFailure {
                operation: "sync".to_string(),
                message: "sync already in progress".to_string(),
            },
            SyncError::ConflictNotFound(id) => AppError::not_found("Conflict", id),
            SyncError::InvalidData(message) => AppError::SerializationError { message },
            SyncError::Serialization(e) => AppError::from(e),
            SyncError::Custom(message) => AppError::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::ConflictNotFound("c-1".to_string());
        assert!(err.to_string().contains("c-1"));
    }

    #[test]
    fn test_invalid_data_error() {
        let err = SyncError::invalid_data("bad fee");
        assert!(err.to_string().contains("Invalid sync data"));
    }

    #[test]
    fn test_store_error_passes_through() {
        let err = SyncError::from(AppError::not_found("Entry", "abc"));
        assert!(matches!(AppError::from(err), AppError::RecordNotFound { .. }));
    }

    #[test]
    fn test_offline_is_retryable() {
        let err = AppError::from(SyncError::Offline("connection refused".to_string()));
        assert!(err.is_retryable());
    }
}
