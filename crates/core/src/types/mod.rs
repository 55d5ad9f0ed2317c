//! Domain types for Lotkeeper
//!
//! This module contains all domain models organized by responsibility:
//! - `entry`: Parking entries, identifiers, natural keys and patches
//! - `fee`: Fee schedule and calculation
//! - `sync`: Per-entry sync metadata
//! - `queue`: Operation queue rows and counters
//! - `stats`: Parking statistics
//! - `common`: Timestamps, money and shared traits

mod common;
mod entry;
mod fee;
mod queue;
mod stats;
mod sync;

// Re-export all public types
pub use common::{Money, Timestamp, Validator, MILLIS_PER_DAY, MILLIS_PER_HOUR};
pub use entry::{
    normalize_vehicle_number, EntryField, EntryFilter, EntryId, EntryPatch, EntryStatus,
    NaturalKey, Origin, ParkingEntry, PaymentStatus, RemoteId,
};
pub use fee::{FeeCalculation, FeeSchedule};
pub use queue::{
    FailureOutcome, OperationId, OperationStatus, OperationType, QueueStatus, QueuedOperation,
};
pub use stats::{EntryStatistics, GroupStats};
pub use sync::{SyncMetadata, SyncMetadataUpdate, SyncStatus};
