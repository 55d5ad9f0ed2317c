//! Shared data model for Lotkeeper
//!
//! Parking entries, fixed-point money, fee logic, sync metadata, queue types,
//! statistics and the `AppError` taxonomy used by every other crate.

pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{AppError, ErrorSeverity, RecoveryAction, Result};
pub use types::{
    normalize_vehicle_number, EntryField, EntryFilter, EntryId, EntryPatch, EntryStatistics,
    EntryStatus, FailureOutcome, FeeCalculation, FeeSchedule, GroupStats, Money, NaturalKey,
    OperationId, OperationStatus, OperationType, Origin, ParkingEntry, PaymentStatus,
    QueueStatus, QueuedOperation, RemoteId, SyncMetadata, SyncMetadataUpdate, SyncStatus,
    Timestamp, Validator, MILLIS_PER_DAY, MILLIS_PER_HOUR,
};
