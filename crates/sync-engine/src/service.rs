// crates/sync-engine/src/service.rs
//! Parking service: user-facing mutations
//!
//! Every write goes to the record store first and is then mirrored into the
//! operation queue, under the same per-entry lock the sync engine takes.

use crate::error::SyncResult;
use crate::protocol::RemotePayload;
use lotkeeper_core::{
    AppError, EntryFilter, EntryId, EntryPatch, EntryStatistics, EntryStatus, FeeCalculation,
    FeeSchedule, Money, OperationType, ParkingEntry, PaymentStatus, Timestamp,
};
use lotkeeper_database::{OperationQueue, RecordStore};
use lotkeeper_resilience::KeyedLock;

/// Facade over the record store and operation queue for parking operations
#[derive(Clone)]
pub struct ParkingService {
    store: RecordStore,
    queue: OperationQueue,
    locks: KeyedLock<EntryId>,
    fees: FeeSchedule,
}

impl ParkingService {
    pub fn new(
        store: RecordStore,
        queue: OperationQueue,
        locks: KeyedLock<EntryId>,
        fees: FeeSchedule,
    ) -> Self {
        Self {
            store,
            queue,
            locks,
            fees,
        }
    }

    pub fn fee_schedule(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Mirrors a committed write into the queue.
    ///
    /// A failure here leaves the entry dirty; the next push re-queues it.
    async fn mirror(&self, operation_type: OperationType, entry: &ParkingEntry) {
        let payload = match RemotePayload::from_entry(entry).and_then(|p| Ok(serde_json::to_string(&p)?)) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Could not snapshot entry {}: {}", entry.id, e);
                return;
            }
        };
        if let Err(e) = self.queue.enqueue(operation_type, entry.id, &payload, None).await {
            log::warn!(
                "Entry {} saved but {} not queued ({}); it will be re-queued on the next push",
                entry.id,
                operation_type,
                e
            );
        }
    }

    /// Registers a parked vehicle
    pub async fn create_entry(&self, entry: ParkingEntry) -> SyncResult<ParkingEntry> {
        let _guard = self.locks.lock(entry.id).await;
        let id = self.store.create(&entry).await?;
        let stored = self.store.get(id).await?;
        self.mirror(OperationType::Create, &stored).await;

        log::info!("Parked {} ({})", stored.vehicle_number, stored.id);
        Ok(stored)
    }

    pub async fn update_entry(&self, id: EntryId, patch: &EntryPatch) -> SyncResult<ParkingEntry> {
        if patch.is_empty() {
            return Ok(self.store.get(id).await?);
        }
        let _guard = self.locks.lock(id).await;
        let updated = self.store.update(id, patch).await?;
        self.mirror(OperationType::Update, &updated).await;
        Ok(updated)
    }

    /// Marks the vehicle as exited and charges the computed fee
    pub async fn record_exit(
        &self,
        id: EntryId,
        exit_time: Timestamp,
        payment: Option<PaymentStatus>,
    ) -> SyncResult<(ParkingEntry, FeeCalculation)> {
        let _guard = self.locks.lock(id).await;
        let current = self.store.get(id).await?;
        if current.status == EntryStatus::Exited {
            return Err(AppError::invalid_argument(format!(
                "vehicle {} already exited",
                current.vehicle_number
            ))
            .into());
        }

        let fee = self
            .fees
            .calculate(&current.vehicle_type, current.entry_time, exit_time)?;
        let patch = EntryPatch {
            exit_time: Some(Some(exit_time)),
            status: Some(EntryStatus::Exited),
            parking_fee: Some(fee.total_fee),
            payment_status: payment,
            ..Default::default()
        };
        let updated = self.store.update(id, &patch).await?;
        self.mirror(OperationType::Update, &updated).await;

        log::info!(
            "Vehicle {} exited after {} day(s), fee {}",
            updated.vehicle_number,
            fee.billed_days,
            fee.total_fee
        );
        Ok((updated, fee))
    }

    pub async fn record_payment(
        &self,
        id: EntryId,
        status: PaymentStatus,
        payment_type: Option<String>,
    ) -> SyncResult<ParkingEntry> {
        let patch = EntryPatch {
            payment_status: Some(status),
            payment_type: payment_type.map(Some),
            ..Default::default()
        };
        self.update_entry(id, &patch).await
    }

    /// Tombstones an entry; the tombstone is purged once the remote confirms the delete
    pub async fn delete_entry(&self, id: EntryId) -> SyncResult<()> {
        let _guard = self.locks.lock(id).await;
        let tombstone = self.store.soft_delete(id).await?;
        self.mirror(OperationType::Delete, &tombstone).await;
        Ok(())
    }

    pub async fn get_entry(&self, id: EntryId) -> SyncResult<ParkingEntry> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_entries(&self, filter: &EntryFilter) -> SyncResult<Vec<ParkingEntry>> {
        Ok(self.store.list(filter).await?)
    }

    pub async fn statistics(&self) -> SyncResult<EntryStatistics> {
        Ok(self.store.statistics().await?)
    }

    /// Parked vehicles that stayed past the overstay threshold at `now`
    pub async fn overstayed(&self, now: Timestamp) -> SyncResult<Vec<ParkingEntry>> {
        let filter = EntryFilter {
            status: Some(EntryStatus::Parked),
            ..Default::default()
        };
        let threshold = self.fees.overstay_threshold_hours;
        Ok(self
            .store
            .list(&filter)
            .await?
            .into_iter()
            .filter(|e| e.is_overstayed(now, threshold))
            .collect())
    }

    pub fn estimate(&self, vehicle_type: &str, hours: i64) -> Money {
        self.fees.estimate(vehicle_type, hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotkeeper_core::{OperationStatus, SyncStatus, MILLIS_PER_HOUR};
    use lotkeeper_database::{connect_in_memory, run_migrations, run_queue_migrations};

    const ENTRY: i64 = 1_705_312_800_000;

    async fn service() -> ParkingService {
        let pool = connect_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_queue_migrations(&pool).await.unwrap();
        ParkingService::new(
            RecordStore::new(pool.clone()),
            OperationQueue::new(pool),
            KeyedLock::new(),
            FeeSchedule::default(),
        )
    }

    fn trailer(number: &str) -> ParkingEntry {
        ParkingEntry::new("Blue Dart", "Trailer", number, Timestamp::from_millis(ENTRY))
    }

    #[tokio::test]
    async fn test_create_mirrors_into_queue() {
        let service = service().await;
        let entry = service.create_entry(trailer("ka01ab1234")).await.unwrap();
        assert_eq!(entry.vehicle_number, "KA01AB1234");

        let ready = service.queue.dequeue_ready(10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].operation_type, OperationType::Create);
        assert_eq!(ready[0].target, entry.id);
        assert!(ready[0].payload.contains("\"schema\":\"entry.v1\""));
    }

    #[tokio::test]
    async fn test_record_exit_charges_fee() {
        let service = service().await;
        let entry = service.create_entry(trailer("EXIT01")).await.unwrap();

        let exit = Timestamp::from_millis(ENTRY + 25 * MILLIS_PER_HOUR);
        let (updated, fee) = service
            .record_exit(entry.id, exit, Some(PaymentStatus::Paid))
            .await
            .unwrap();

        assert_eq!(updated.status, EntryStatus::Exited);
        assert_eq!(updated.exit_time, Some(exit));
        assert_eq!(fee.billed_days, 2);
        assert_eq!(updated.parking_fee, fee.total_fee);
        assert_eq!(updated.payment_status, PaymentStatus::Paid);

        let meta = service.store.get_sync_metadata(entry.id).await.unwrap();
        assert!(meta.is_dirty);
        assert_eq!(meta.sync_status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_second_exit_rejected() {
        let service = service().await;
        let entry = service.create_entry(trailer("EXIT02")).await.unwrap();
        let exit = Timestamp::from_millis(ENTRY + MILLIS_PER_HOUR);
        service.record_exit(entry.id, exit, None).await.unwrap();

        let err = service.record_exit(entry.id, exit, None).await.unwrap_err();
        assert!(matches!(
            AppError::from(err),
            AppError::InvalidArgument { .. }
        ));
    }

    #[tokio::test]
    async fn test_exit_before_entry_rejected() {
        let service = service().await;
        let entry = service.create_entry(trailer("EXIT03")).await.unwrap();
        let err = service
            .record_exit(entry.id, Timestamp::from_millis(ENTRY - 1), None)
            .await
            .unwrap_err();
        assert!(matches!(AppError::from(err), AppError::InvalidArgument { .. }));

        let unchanged = service.get_entry(entry.id).await.unwrap();
        assert_eq!(unchanged.status, EntryStatus::Parked);
    }

    #[tokio::test]
    async fn test_delete_tombstones_and_queues() {
        let service = service().await;
        let entry = service.create_entry(trailer("DEL001")).await.unwrap();
        service.delete_entry(entry.id).await.unwrap();

        assert!(service.get_entry(entry.id).await.is_err());
        let tombstone = service.store.get_any(entry.id).await.unwrap().unwrap();
        assert!(tombstone.is_deleted());

        let status = service.queue.status().await.unwrap();
        assert_eq!(status.pending, 2);
        let ready = service.queue.dequeue_ready(10).await.unwrap();
        // The delete waits behind the create of the same entry
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].status, OperationStatus::Pending);
        assert_eq!(ready[0].operation_type, OperationType::Create);
    }

    #[tokio::test]
    async fn test_overstayed() {
        let service = service().await;
        let long = service.create_entry(trailer("LONG01")).await.unwrap();
        let mut short = trailer("SHORT1");
        short.entry_time = Timestamp::from_millis(ENTRY + 20 * MILLIS_PER_HOUR);
        service.create_entry(short).await.unwrap();

        let now = Timestamp::from_millis(ENTRY + 30 * MILLIS_PER_HOUR);
        let overstayed = service.overstayed(now).await.unwrap();
        assert_eq!(overstayed.len(), 1);
        assert_eq!(overstayed[0].id, long.id);
    }

    #[tokio::test]
    async fn test_record_payment() {
        let service = service().await;
        let entry = service.create_entry(trailer("PAY001")).await.unwrap();
        let paid = service
            .record_payment(entry.id, PaymentStatus::Paid, Some("UPI".to_string()))
            .await
            .unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(paid.payment_type.as_deref(), Some("UPI"));
    }

    #[tokio::test]
    async fn test_estimate_uses_schedule() {
        let service = service().await;
        assert_eq!(service.estimate("Trailer", 30), Money::from_major(450));
        assert_eq!(service.estimate("Unknown", 1), Money::from_major(100));
    }
}
