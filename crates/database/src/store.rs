//! Record store: parking entries plus their sync metadata
//!
//! Every write changes the entry row and its metadata row in one
//! transaction. Callers serialize writes per entry with a keyed lock.

use crate::queries::{entries, stats, sync_metadata, system};
use crate::DbPool;
use lotkeeper_core::{
    AppError, EntryFilter, EntryId, EntryPatch, EntryStatistics, NaturalKey, Origin,
    ParkingEntry, RemoteId, SyncMetadata, SyncMetadataUpdate, SyncStatus, Timestamp, Validator,
};

/// An entry together with its metadata row
pub type TrackedEntry = (ParkingEntry, SyncMetadata);

/// Durable table of parking entries with per-entry sync metadata
#[derive(Debug, Clone)]
pub struct RecordStore {
    pool: DbPool,
}

fn validate(entry: &ParkingEntry) -> Result<(), AppError> {
    entry
        .validate()
        .map_err(|errors| AppError::ValidationFailed { errors })
}

fn begin_error(e: sqlx::Error) -> AppError {
    AppError::database("Failed to begin transaction", e)
}

fn commit_error(e: sqlx::Error) -> AppError {
    AppError::database("Failed to commit transaction", e)
}

/// Modification time of a write: never earlier than `previous`, never equal
fn next_modified(previous: Timestamp, candidate: Option<Timestamp>) -> Timestamp {
    match candidate {
        Some(t) if t > previous => t,
        Some(_) => previous.plus_millis(1),
        None => Timestamp::advance_from(previous),
    }
}

impl RecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Validates and stores a new local entry; metadata starts pending and dirty.
    ///
    /// Fails with `DuplicateKey` when the natural key is taken, tombstones included.
    pub async fn create(&self, entry: &ParkingEntry) -> Result<EntryId, AppError> {
        validate(entry)?;

        let mut stored = entry.clone();
        stored.remote_id = None;
        stored.created_by = Origin::System;
        stored.deleted_at = None;
        stored.last_modified = Timestamp::now();

        let mut tx = self.pool.begin().await.map_err(begin_error)?;
        entries::insert_entry(&mut *tx, &stored).await?;
        sync_metadata::write_metadata(&mut *tx, &SyncMetadata::new_local(stored.id)).await?;
        tx.commit().await.map_err(commit_error)?;

        log::debug!("Created entry {} ({})", stored.id, stored.natural_key());
        Ok(stored.id)
    }

    /// Applies a partial update; metadata becomes pending and dirty
    pub async fn update(&self, id: EntryId, patch: &EntryPatch) -> Result<ParkingEntry, AppError> {
        let mut tx = self.pool.begin().await.map_err(begin_error)?;

        let current = entries::fetch_entry(&mut *tx, id)
            .await?
            .filter(|e| !e.is_deleted())
            .ok_or_else(|| AppError::not_found("Entry", id.to_string()))?;

        let mut updated = patch.apply(&current);
        validate(&updated)?;
        updated.last_modified = next_modified(current.last_modified, None);

        entries::update_entry(&mut *tx, &updated).await?;
        sync_metadata::mark_local_edit(&mut *tx, id).await?;
        tx.commit().await.map_err(commit_error)?;

        Ok(updated)
    }

    /// Gets a live entry
    pub async fn get(&self, id: EntryId) -> Result<ParkingEntry, AppError> {
        self.get_any(id)
            .await?
            .filter(|e| !e.is_deleted())
            .ok_or_else(|| AppError::not_found("Entry", id.to_string()))
    }

    /// Gets an entry, tombstones included
    pub async fn get_any(&self, id: EntryId) -> Result<Option<ParkingEntry>, AppError> {
        entries::fetch_entry(&self.pool, id).await
    }

    pub async fn list(&self, filter: &EntryFilter) -> Result<Vec<ParkingEntry>, AppError> {
        entries::list_entries(&self.pool, filter).await
    }

    pub async fn statistics(&self) -> Result<EntryStatistics, AppError> {
        stats::get_statistics(&self.pool).await
    }

    /// Entries with unacknowledged local changes, tombstones included, oldest change first
    pub async fn get_dirty_entities(&self) -> Result<Vec<TrackedEntry>, AppError> {
        let sql = format!(
            "{} WHERE m.is_dirty = 1 ORDER BY e.last_modified ASC, e.id ASC",
            entries::SELECT_ENTRY
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database("Failed to list dirty entries", e))?;

        rows.into_iter().map(tracked_from_row).collect()
    }

    pub async fn get_sync_metadata(&self, id: EntryId) -> Result<SyncMetadata, AppError> {
        sync_metadata::fetch_metadata(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::not_found("SyncMetadata", id.to_string()))
    }

    /// Merges `update` into the metadata row of an existing entry
    pub async fn upsert_sync_metadata(
        &self,
        id: EntryId,
        update: &SyncMetadataUpdate,
    ) -> Result<SyncMetadata, AppError> {
        let mut tx = self.pool.begin().await.map_err(begin_error)?;

        if entries::fetch_entry(&mut *tx, id).await?.is_none() {
            return Err(AppError::not_found("Entry", id.to_string()));
        }
        let current = sync_metadata::fetch_metadata(&mut *tx, id)
            .await?
            .unwrap_or_else(|| SyncMetadata::new_local(id));
        let merged = sync_metadata::merge_update(current, update);
        sync_metadata::write_metadata(&mut *tx, &merged).await?;

        tx.commit().await.map_err(commit_error)?;
        Ok(merged)
    }

    pub async fn find_by_remote_id(
        &self,
        remote_id: &RemoteId,
    ) -> Result<Option<TrackedEntry>, AppError> {
        entries::fetch_by_remote_id(&self.pool, remote_id)
            .await?
            .map(tracked_from_row)
            .transpose()
    }

    /// Looks up (vehicle number, entry time), tombstones included
    pub async fn find_by_natural_key(
        &self,
        key: &NaturalKey,
    ) -> Result<Option<TrackedEntry>, AppError> {
        entries::fetch_by_natural_key(&self.pool, key)
            .await?
            .map(tracked_from_row)
            .transpose()
    }

    /// Tombstones an entry until its delete reaches the remote
    pub async fn soft_delete(&self, id: EntryId) -> Result<ParkingEntry, AppError> {
        let mut tx = self.pool.begin().await.map_err(begin_error)?;

        let mut entry = entries::fetch_entry(&mut *tx, id)
            .await?
            .filter(|e| !e.is_deleted())
            .ok_or_else(|| AppError::not_found("Entry", id.to_string()))?;

        let now = next_modified(entry.last_modified, None);
        entry.deleted_at = Some(now);
        entry.last_modified = now;

        entries::update_entry(&mut *tx, &entry).await?;
        sync_metadata::mark_local_edit(&mut *tx, id).await?;
        tx.commit().await.map_err(commit_error)?;

        Ok(entry)
    }

    /// Removes an entry and its metadata for good
    pub async fn purge(&self, id: EntryId) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(begin_error)?;

        sqlx::query("DELETE FROM sync_metadata WHERE entry_id = ?")
            .bind(id.as_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database("Failed to delete sync metadata", e))?;
        let removed = entries::delete_entry(&mut *tx, id).await?;

        if removed == 0 {
            return Err(AppError::not_found("Entry", id.to_string()));
        }
        tx.commit().await.map_err(commit_error)?;

        log::debug!("Purged entry {}", id);
        Ok(())
    }

    /// Stores a record first seen on the remote as synced and clean
    pub async fn insert_remote(
        &self,
        entry: &ParkingEntry,
        remote_id: &RemoteId,
    ) -> Result<EntryId, AppError> {
        validate(entry)?;

        let mut stored = entry.clone();
        stored.id = EntryId::new();
        stored.remote_id = Some(remote_id.clone());
        stored.created_by = Origin::Remote;

        let meta = SyncMetadata {
            entry_id: stored.id,
            remote_id: Some(remote_id.clone()),
            sync_status: SyncStatus::Synced,
            is_dirty: false,
            last_synced: Some(Timestamp::now()),
        };

        let mut tx = self.pool.begin().await.map_err(begin_error)?;
        entries::insert_entry(&mut *tx, &stored).await?;
        sync_metadata::write_metadata(&mut *tx, &meta).await?;
        tx.commit().await.map_err(commit_error)?;

        Ok(stored.id)
    }

    /// Overwrites a local entry with the remote version and marks it synced and clean
    pub async fn apply_remote(
        &self,
        id: EntryId,
        remote: &ParkingEntry,
        remote_id: &RemoteId,
    ) -> Result<ParkingEntry, AppError> {
        self.apply_resolution(
            id,
            remote,
            &SyncMetadataUpdate::synced(Some(remote_id.clone())),
        )
        .await
    }

    /// Writes a chosen or merged version of an entry and its metadata together.
    ///
    /// Business fields and the tombstone come from `resolved`; identity and
    /// origin stay local. The modification time never moves backwards.
    pub async fn apply_resolution(
        &self,
        id: EntryId,
        resolved: &ParkingEntry,
        update: &SyncMetadataUpdate,
    ) -> Result<ParkingEntry, AppError> {
        let mut tx = self.pool.begin().await.map_err(begin_error)?;

        let current = entries::fetch_entry(&mut *tx, id)
            .await?
            .ok_or_else(|| AppError::not_found("Entry", id.to_string()))?;

        let mut written = resolved.clone();
        written.id = current.id;
        written.created_by = current.created_by;
        written.last_modified = next_modified(current.last_modified, Some(resolved.last_modified));
        if written.deleted_at.is_none() {
            validate(&written)?;
        }

        entries::update_entry(&mut *tx, &written).await?;
        let meta = sync_metadata::fetch_metadata(&mut *tx, id)
            .await?
            .unwrap_or_else(|| SyncMetadata::new_local(id));
        let meta = sync_metadata::merge_update(meta, update);
        sync_metadata::write_metadata(&mut *tx, &meta).await?;
        tx.commit().await.map_err(commit_error)?;

        written.remote_id = meta.remote_id;
        Ok(written)
    }

    /// Flags divergent remote state; the local copy is left untouched
    pub async fn mark_conflict(&self, id: EntryId) -> Result<SyncMetadata, AppError> {
        self.upsert_sync_metadata(id, &SyncMetadataUpdate::conflict())
            .await
    }

    pub async fn conflicted_ids(&self) -> Result<Vec<EntryId>, AppError> {
        sync_metadata::conflicted_ids(&self.pool).await
    }

    /// Returns entries left `syncing` by an interrupted push to `pending`
    pub async fn reset_in_flight(&self) -> Result<u64, AppError> {
        let reset = sync_metadata::reset_syncing(&self.pool).await?;
        if reset > 0 {
            log::info!("Reset {} in-flight entries to pending", reset);
        }
        Ok(reset)
    }

    /// Marker of the last successful pull
    pub async fn checkpoint(&self) -> Result<Option<String>, AppError> {
        system::get_value(&self.pool, system::CHECKPOINT_KEY).await
    }

    pub async fn set_checkpoint(&self, checkpoint: &str) -> Result<(), AppError> {
        system::set_value(&self.pool, system::CHECKPOINT_KEY, checkpoint).await
    }
}

fn tracked_from_row(row: sqlx::sqlite::SqliteRow) -> Result<TrackedEntry, AppError> {
    let meta = sync_metadata::row_ref_to_metadata(&row)?;
    let entry = entries::row_to_entry(row)?;
    Ok((entry, meta))
}
