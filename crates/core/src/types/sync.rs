//! Per-entry sync metadata

use crate::types::{EntryId, RemoteId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sync lifecycle of a single entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local changes waiting to be pushed
    Pending,
    /// Picked up by a push in progress
    Syncing,
    /// Acknowledged by the remote
    Synced,
    /// Divergent remote state awaiting resolution
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            other => Err(format!("unknown sync status '{}'", other)),
        }
    }
}

/// Sync metadata row, one per entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub entry_id: EntryId,
    pub remote_id: Option<RemoteId>,
    pub sync_status: SyncStatus,
    pub is_dirty: bool,
    pub last_synced: Option<Timestamp>,
}

impl SyncMetadata {
    /// Metadata for a freshly created local entry
    pub fn new_local(entry_id: EntryId) -> Self {
        Self {
            entry_id,
            remote_id: None,
            sync_status: SyncStatus::Pending,
            is_dirty: true,
            last_synced: None,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.sync_status == SyncStatus::Synced && !self.is_dirty
    }
}

/// Partial update of a metadata row; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMetadataUpdate {
    pub remote_id: Option<RemoteId>,
    pub sync_status: Option<SyncStatus>,
    pub is_dirty: Option<bool>,
    pub last_synced: Option<Timestamp>,
}

impl SyncMetadataUpdate {
    pub fn syncing() -> Self {
        Self {
            sync_status: Some(SyncStatus::Syncing),
            ..Default::default()
        }
    }

    /// Remote acknowledged the entry
    pub fn synced(remote_id: Option<RemoteId>) -> Self {
        Self {
            remote_id,
            sync_status: Some(SyncStatus::Synced),
            is_dirty: Some(false),
            last_synced: Some(Timestamp::now()),
        }
    }

    pub fn pending() -> Self {
        Self {
            sync_status: Some(SyncStatus::Pending),
            is_dirty: Some(true),
            ..Default::default()
        }
    }

    pub fn conflict() -> Self {
        Self {
            sync_status: Some(SyncStatus::Conflict),
            ..Default::default()
        }
    }

    pub fn with_remote_id(mut self, remote_id: RemoteId) -> Self {
        self.remote_id = Some(remote_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_local_is_pending_and_dirty() {
        let meta = SyncMetadata::new_local(EntryId::new());
        assert_eq!(meta.sync_status, SyncStatus::Pending);
        assert!(meta.is_dirty);
        assert!(!meta.is_synced());
        assert!(meta.remote_id.is_none());
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Syncing,
            SyncStatus::Synced,
            SyncStatus::Conflict,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("done".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_synced_update_clears_dirty() {
        let update = SyncMetadataUpdate::synced(Some(RemoteId::new("r-9")));
        assert_eq!(update.sync_status, Some(SyncStatus::Synced));
        assert_eq!(update.is_dirty, Some(false));
        assert!(update.last_synced.is_some());
    }
}
