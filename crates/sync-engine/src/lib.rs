// crates/sync-engine/src/lib.rs
//! Offline-first synchronization of parking entries
//!
//! This crate reconciles the local record store with a remote service:
//! - Pushing queued local mutations with retry and backoff
//! - Pulling remote changes since a checkpoint
//! - Conflict detection with rule-based automatic merging
//! - A parking service that mirrors every write into the queue
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lotkeeper_sync_engine::{RemoteClient, SyncEngine, SyncSettings};
//! use lotkeeper_database::{open_operation_queue, open_record_store, DatabaseConfig};
//!
//! # async fn run(remote: Arc<dyn RemoteClient>) -> Result<(), Box<dyn std::error::Error>> {
//! let store = open_record_store(DatabaseConfig::new("parking.db")).await?;
//! let queue = open_operation_queue(DatabaseConfig::new("queue.db"), 5).await?;
//!
//! let engine = SyncEngine::new(store, queue, remote, SyncSettings::default());
//! engine.recover().await?;
//! let outcome = engine.sync_now().await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

mod conflict;
mod engine;
mod error;
mod protocol;
mod remote;
mod scheduler;
mod service;
mod types;

pub use conflict::{
    ConflictResolver, HigherFeeRule, MergePolicy, MergeRule, PaidPaymentRule, TerminalStatusRule,
    Verdict,
};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use protocol::{RemoteChangeSet, RemotePayload, WireMoney, ENTRY_SCHEMA};
pub use remote::{RemoteClient, RemoteError};
pub use scheduler::SyncScheduler;
pub use service::ParkingService;
pub use types::{
    ConflictId, ConflictKind, ConflictRecord, ConflictStatistics, CycleOutcome, CycleReport,
    EngineStatus, EntryVersion, PhaseReport, Resolution, ResolutionSuggestion, SyncPhase,
    SyncSettings, TerminalFailure,
};
