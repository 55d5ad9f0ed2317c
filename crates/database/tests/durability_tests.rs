//! File-backed store and queue behavior across reopen

use lotkeeper_core::{
    AppError, EntryFilter, EntryStatus, Money, OperationStatus, OperationType, ParkingEntry,
    PaymentStatus, SyncStatus, Timestamp,
};
use lotkeeper_database::{
    connect_in_memory, open_operation_queue, open_record_store, run_migrations,
    run_queue_migrations, DatabaseConfig, OperationQueue, RecordStore,
};
use std::time::Duration;
use tempfile::TempDir;

fn db_config(dir: &TempDir, name: &str) -> DatabaseConfig {
    DatabaseConfig::new(dir.path().join(name).to_string_lossy().to_string())
}

#[tokio::test]
async fn queue_survives_reopen_and_recovers_in_flight() -> Result<(), AppError> {
    let dir = TempDir::new()?;
    let target = lotkeeper_core::EntryId::new();

    let (claimed, waiting) = {
        let queue = open_operation_queue(db_config(&dir, "queue.db"), 5).await?;
        let claimed = queue
            .enqueue(OperationType::Create, target, "{\"n\":1}", None)
            .await?;
        let waiting = queue
            .enqueue(OperationType::Update, target, "{\"n\":2}", None)
            .await?;
        queue.mark_processing(claimed).await?;
        queue.pool().close().await;
        (claimed, waiting)
    };

    let queue = open_operation_queue(db_config(&dir, "queue.db"), 5).await?;
    assert_eq!(queue.get(claimed).await?.status, OperationStatus::Processing);

    assert_eq!(queue.recover_in_flight().await?, 1);
    let ready = queue.dequeue_ready(10).await?;
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, claimed);
    assert_eq!(ready[0].payload, "{\"n\":1}");

    queue.mark_processing(claimed).await?;
    queue.mark_completed(claimed).await?;
    let ready = queue.dequeue_ready(10).await?;
    assert_eq!(ready[0].id, waiting);
    Ok(())
}

#[tokio::test]
async fn dequeue_order_for_priorities_two_one_one() -> Result<(), AppError> {
    let pool = connect_in_memory().await?;
    run_queue_migrations(&pool).await?;
    let queue = OperationQueue::new(pool);

    let p2 = queue
        .enqueue(OperationType::Update, lotkeeper_core::EntryId::new(), "{}", Some(2))
        .await?;
    let p1a = queue
        .enqueue(OperationType::Create, lotkeeper_core::EntryId::new(), "{}", Some(1))
        .await?;
    let p1b = queue
        .enqueue(OperationType::Create, lotkeeper_core::EntryId::new(), "{}", Some(1))
        .await?;

    let order: Vec<_> = queue
        .dequeue_ready(10)
        .await?
        .into_iter()
        .map(|op| op.id)
        .collect();
    assert_eq!(order, vec![p1a, p1b, p2]);
    Ok(())
}

#[tokio::test]
async fn failed_operation_is_eligible_only_after_backoff() -> Result<(), AppError> {
    let pool = connect_in_memory().await?;
    run_queue_migrations(&pool).await?;
    let queue = OperationQueue::new(pool);

    let id = queue
        .enqueue(OperationType::Create, lotkeeper_core::EntryId::new(), "{}", None)
        .await?;
    queue.mark_processing(id).await?;
    queue.mark_failed(id, "503", Duration::from_millis(50)).await?;

    assert!(queue.dequeue_ready(10).await?.is_empty());
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(queue.dequeue_ready(10).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn store_survives_reopen() -> Result<(), AppError> {
    let dir = TempDir::new()?;
    let entry = ParkingEntry::new("Carrier", "Trailer", "KA01AB1234", Timestamp::from_millis(1_000));

    {
        let store = open_record_store(db_config(&dir, "parking.db")).await?;
        store.create(&entry).await?;
        store.pool().close().await;
    }

    let store = open_record_store(db_config(&dir, "parking.db")).await?;
    let loaded = store.get(entry.id).await?;
    assert_eq!(loaded.vehicle_number, "KA01AB1234");
    assert_eq!(store.get_sync_metadata(entry.id).await?.sync_status, SyncStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn snapshot_round_trip_into_fresh_store() -> Result<(), AppError> {
    let source = {
        let pool = connect_in_memory().await?;
        run_migrations(&pool).await?;
        RecordStore::new(pool)
    };

    let mut exited = ParkingEntry::new("Carrier", "Trailer", "TEST123", Timestamp::from_millis(1_000));
    exited.status = EntryStatus::Exited;
    exited.exit_time = Some(Timestamp::from_millis(90_000_000));
    exited.parking_fee = Money::from_major(450);
    exited.payment_status = PaymentStatus::Paid;
    exited.driver_name = Some("Ravi".to_string());
    source.create(&exited).await?;

    let parked = ParkingEntry::new("Local", "2 Wheeler", "MH12XY0001", Timestamp::from_millis(5_000));
    source.create(&parked).await?;

    let document = source.export_snapshot().await?;
    assert_eq!(document.entries.len(), 2);

    let target = {
        let pool = connect_in_memory().await?;
        run_migrations(&pool).await?;
        RecordStore::new(pool)
    };
    let report = target.import_snapshot(&document.entries).await?;
    assert_eq!(report.imported, 2);

    let before = source.list(&EntryFilter::default()).await?;
    let after = target.list(&EntryFilter::default()).await?;
    assert_eq!(before, after);

    let fee_entry = target.get(exited.id).await?;
    assert_eq!(fee_entry.parking_fee, Money::from_major(450));
    assert_eq!(fee_entry.status, EntryStatus::Exited);
    Ok(())
}
