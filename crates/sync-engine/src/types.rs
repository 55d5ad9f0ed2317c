// crates/sync-engine/src/types.rs
//! Core sync types and data structures

use lotkeeper_core::{EntryId, OperationId, ParkingEntry, RemoteId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique conflict identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One side of a comparison: a live record or a deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryVersion {
    Live(ParkingEntry),
    Deleted {
        /// Last known state before the deletion
        last_known: ParkingEntry,
        deleted_at: Timestamp,
    },
}

impl EntryVersion {
    /// Classifies an entry by its tombstone
    pub fn from_entry(entry: ParkingEntry) -> Self {
        match entry.deleted_at {
            Some(deleted_at) => Self::Deleted {
                last_known: entry,
                deleted_at,
            },
            None => Self::Live(entry),
        }
    }

    pub fn entry(&self) -> &ParkingEntry {
        match self {
            Self::Live(entry) => entry,
            Self::Deleted { last_known, .. } => last_known,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted { .. })
    }

    pub fn last_modified(&self) -> Timestamp {
        match self {
            Self::Live(entry) => entry.last_modified,
            Self::Deleted { deleted_at, last_known } => (*deleted_at).max(last_known.last_modified),
        }
    }
}

/// How two versions of an entry diverged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Both sides created a record with the same natural key
    CreateCreate,
    /// Both sides edited the record
    UpdateUpdate,
    /// Local edited, remote deleted
    UpdateDelete,
    /// Local deleted, remote edited
    DeleteUpdate,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateCreate => "create/create",
            Self::UpdateUpdate => "update/update",
            Self::UpdateDelete => "update/delete",
            Self::DeleteUpdate => "delete/update",
        };
        f.write_str(name)
    }
}

/// Outcome chosen for a conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Keep the local version and push it
    UseLocal,
    /// Adopt the remote version, discarding local changes
    UseRemote,
    /// Write a combined version and push it
    Merged(ParkingEntry),
}

impl Resolution {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UseLocal => "use-local",
            Self::UseRemote => "use-remote",
            Self::Merged(_) => "merged",
        }
    }
}

/// A detected divergence between local and remote state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub kind: ConflictKind,
    pub local: EntryVersion,
    pub remote: EntryVersion,
    /// Remote id of the remote side, when known
    pub remote_id: Option<RemoteId>,
    /// Result of automatic merging, when the merge policy covered every difference
    pub merged: Option<ParkingEntry>,
    pub resolution: Option<Resolution>,
    pub detected_at: Timestamp,
    pub notes: Option<String>,
}

impl ConflictRecord {
    pub fn new(kind: ConflictKind, local: EntryVersion, remote: EntryVersion) -> Self {
        Self {
            id: ConflictId::new(),
            kind,
            local,
            remote,
            remote_id: None,
            merged: None,
            resolution: None,
            detected_at: Timestamp::now(),
            notes: None,
        }
    }

    /// Local id of the conflicting entry
    pub fn entry_id(&self) -> EntryId {
        self.local.entry().id
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

/// A resolution offered to an operator, best first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSuggestion {
    pub resolution: Resolution,
    pub reason: String,
}

/// Resolver counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictStatistics {
    pub detected: u64,
    pub auto_resolved: u64,
    pub manually_resolved: u64,
    pub pending: u64,
    /// Share of detected conflicts resolved automatically, in percent
    pub auto_resolution_rate: f64,
}

/// An operation that will not be retried without operator action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalFailure {
    pub operation_id: OperationId,
    pub entry_id: EntryId,
    pub error: String,
}

/// Counters of one push or pull phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub synced: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub merged: usize,
    /// Operations skipped because their entry awaits conflict resolution
    pub deferred: usize,
    pub terminal: Vec<TerminalFailure>,
}

impl PhaseReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.conflicts == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub push: PhaseReport,
    pub pull: PhaseReport,
    pub duration_ms: u64,
}

/// Result of requesting a sync cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already running; this request was coalesced into it
    Skipped,
    /// Sync is switched off
    Disabled,
}

/// Phase of the cycle state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    #[default]
    Idle,
    Pushing,
    Pulling,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Pushing => "pushing",
            Self::Pulling => "pulling",
        };
        f.write_str(name)
    }
}

/// Observable engine state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub enabled: bool,
    pub is_syncing: bool,
    pub phase: SyncPhase,
    pub last_sync_time: Option<Timestamp>,
    pub sync_count: u64,
    pub error_count: u64,
}

/// Tuning of the sync engine
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub enabled: bool,
    /// Operations fetched per dequeue
    pub batch_size: usize,
    /// Concurrent remote calls within a batch
    pub max_workers: usize,
    /// Bound on every remote call
    pub request_timeout: Duration,
    /// Maximum modification-time gap for automatic merging
    pub merge_window: Duration,
    /// Backoff before retrying a failed operation
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 50,
            max_workers: 4,
            request_timeout: Duration::from_secs(30),
            merge_window: Duration::from_secs(15 * 60),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ParkingEntry {
        ParkingEntry::new("T", "Trailer", "TYPE01", Timestamp::from_millis(1_000))
    }

    #[test]
    fn test_version_from_tombstone() {
        let mut e = entry();
        assert!(!EntryVersion::from_entry(e.clone()).is_deleted());

        e.deleted_at = Some(Timestamp::from_millis(5_000));
        let version = EntryVersion::from_entry(e.clone());
        assert!(version.is_deleted());
        assert_eq!(version.entry().id, e.id);
    }

    #[test]
    fn test_conflict_id_round_trip() {
        let id = ConflictId::new();
        assert_eq!(ConflictId::from_string(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_default_settings() {
        let settings = SyncSettings::default();
        assert_eq!(settings.merge_window, Duration::from_secs(900));
        assert!(settings.max_workers > 0);
    }

    #[test]
    fn test_phase_report_clean() {
        let mut report = PhaseReport::default();
        assert!(report.is_clean());
        report.failed = 1;
        assert!(!report.is_clean());
    }
}
