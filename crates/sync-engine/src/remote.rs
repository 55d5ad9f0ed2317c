// crates/sync-engine/src/remote.rs
//! Contract of the remote record service

use crate::protocol::{RemoteChangeSet, RemotePayload};
use async_trait::async_trait;
use lotkeeper_core::{AppError, NaturalKey, RemoteId};
use thiserror::Error;

/// Failure of a remote call, classified for retry decisions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Service not reachable at all (connection refused, DNS, offline)
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Timeout, 5xx or throttling; the call may succeed later
    #[error("transient failure: {0}")]
    Transient(String),

    /// Request rejected (4xx); retrying will not help
    #[error("rejected: {0}")]
    Permanent(String),

    /// A record with the same natural key already exists remotely
    #[error("duplicate key (existing id: {existing:?})")]
    DuplicateKey { existing: Option<RemoteId> },

    /// Remote id unknown to the service
    #[error("not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    /// Whether the failed call should be retried with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Transient(_))
    }

    pub fn into_app_error(self, operation: &str) -> AppError {
        let operation = operation.to_string();
        match self {
            Self::Unreachable(message) | Self::Transient(message) => {
                AppError::TransientRemoteFailure { operation, message }
            }
            Self::Permanent(message) | Self::NotFound(message) => {
                AppError::PermanentRemoteFailure { operation, message }
            }
            Self::DuplicateKey { existing } => AppError::DuplicateKey {
                natural_key: existing
                    .map(|id| format!("remote id {}", id))
                    .unwrap_or_else(|| "remote record".to_string()),
            },
        }
    }
}

/// Remote record service.
///
/// Calls must be safe to retry: the engine treats a duplicate key on create
/// as success and looks up the existing record.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Cheap reachability check
    async fn check_connectivity(&self) -> bool;

    async fn create_entry(&self, payload: &RemotePayload) -> Result<RemoteId, RemoteError>;

    async fn update_entry(
        &self,
        remote_id: &RemoteId,
        payload: &RemotePayload,
    ) -> Result<(), RemoteError>;

    async fn delete_entry(&self, remote_id: &RemoteId) -> Result<(), RemoteError>;

    /// Records changed since `checkpoint`, or every record when `None`
    async fn list_entries_since(
        &self,
        checkpoint: Option<&str>,
    ) -> Result<RemoteChangeSet, RemoteError>;

    async fn find_by_natural_key(&self, key: &NaturalKey)
        -> Result<Option<RemoteId>, RemoteError>;
}
