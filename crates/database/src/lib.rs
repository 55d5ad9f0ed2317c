//! Lotkeeper Database Layer
//!
//! Durable local state for the sync core: the record store (parking entries
//! plus per-entry sync metadata) and the operation queue. Both use SQLite
//! through sqlx and may live in separate files or share one.

pub mod connection;
pub mod migrations;
pub mod queries;
pub mod queue;
pub mod snapshot;
pub mod store;

pub use connection::{connect, connect_in_memory, DatabaseConfig, DbPool};
pub use migrations::{current_version, run_migrations, run_queue_migrations};
pub use queue::{OperationQueue, DEFAULT_MAX_ATTEMPTS};
pub use snapshot::{
    read_snapshot_file, write_snapshot_file, ImportReport, SnapshotDocument, SnapshotRecord,
    SNAPSHOT_VERSION,
};
pub use store::{RecordStore, TrackedEntry};

/// Opens the record store database and brings its schema up to date
pub async fn open_record_store(config: DatabaseConfig) -> Result<RecordStore, lotkeeper_core::AppError> {
    let pool = connect(config).await?;
    run_migrations(&pool).await?;
    Ok(RecordStore::new(pool))
}

/// Opens the operation queue database and brings its schema up to date
pub async fn open_operation_queue(
    config: DatabaseConfig,
    max_attempts: u32,
) -> Result<OperationQueue, lotkeeper_core::AppError> {
    let pool = connect(config).await?;
    run_queue_migrations(&pool).await?;
    Ok(OperationQueue::with_max_attempts(pool, max_attempts))
}
