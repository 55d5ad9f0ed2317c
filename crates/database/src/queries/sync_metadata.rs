//! Sync metadata database operations

use crate::queries::entries::corrupt;
use lotkeeper_core::{
    AppError, EntryId, RemoteId, SyncMetadata, SyncMetadataUpdate, SyncStatus, Timestamp,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

fn map_metadata_error(err: sqlx::Error, meta: &SyncMetadata) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::DuplicateKey {
            natural_key: format!(
                "remote id {}",
                meta.remote_id
                    .as_ref()
                    .map(|r| r.as_str())
                    .unwrap_or_default()
            ),
        },
        _ => AppError::database("Failed to write sync metadata", err),
    }
}

/// Inserts or replaces the metadata row of an entry
pub async fn write_metadata<'e, E>(executor: E, meta: &SyncMetadata) -> Result<(), AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO sync_metadata (entry_id, remote_id, sync_status, is_dirty, last_synced)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (entry_id) DO UPDATE SET
            remote_id = excluded.remote_id,
            sync_status = excluded.sync_status,
            is_dirty = excluded.is_dirty,
            last_synced = excluded.last_synced
        "#,
    )
    .bind(meta.entry_id.as_string())
    .bind(meta.remote_id.as_ref().map(|r| r.as_str().to_string()))
    .bind(meta.sync_status.as_str())
    .bind(meta.is_dirty as i64)
    .bind(meta.last_synced.map(|t| t.as_millis()))
    .execute(executor)
    .await
    .map_err(|e| map_metadata_error(e, meta))?;

    Ok(())
}

/// Gets the metadata row of an entry
pub async fn fetch_metadata<'e, E>(
    executor: E,
    entry_id: EntryId,
) -> Result<Option<SyncMetadata>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        SELECT entry_id, remote_id, sync_status, is_dirty, last_synced
        FROM sync_metadata WHERE entry_id = ?
        "#,
    )
    .bind(entry_id.as_string())
    .fetch_optional(executor)
    .await
    .map_err(|e| AppError::database("Failed to fetch sync metadata", e))?
    .map(row_to_metadata)
    .transpose()
}

/// Flags a local edit: dirty, and pending unless a conflict is awaiting resolution
pub async fn mark_local_edit<'e, E>(executor: E, entry_id: EntryId) -> Result<(), AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE sync_metadata SET
            is_dirty = 1,
            sync_status = CASE WHEN sync_status = 'conflict' THEN 'conflict' ELSE 'pending' END
        WHERE entry_id = ?
        "#,
    )
    .bind(entry_id.as_string())
    .execute(executor)
    .await
    .map_err(|e| AppError::database("Failed to mark entry dirty", e))?;

    Ok(())
}

/// Moves every `syncing` row back to `pending`
pub async fn reset_syncing<'e, E>(executor: E) -> Result<u64, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE sync_metadata SET sync_status = 'pending', is_dirty = 1 WHERE sync_status = 'syncing'",
    )
    .execute(executor)
    .await
    .map_err(|e| AppError::database("Failed to reset in-flight metadata", e))?;

    Ok(result.rows_affected())
}

/// Entry ids whose metadata is in `conflict`
pub async fn conflicted_ids<'e, E>(executor: E) -> Result<Vec<EntryId>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT entry_id FROM sync_metadata WHERE sync_status = 'conflict' ORDER BY entry_id",
    )
    .fetch_all(executor)
    .await
    .map_err(|e| AppError::database("Failed to list conflicted entries", e))?;

    ids.iter()
        .map(|id| EntryId::from_string(id).map_err(|e| AppError::database("Invalid entry ID", e)))
        .collect()
}

/// Merges `update` into `current`
pub fn merge_update(mut current: SyncMetadata, update: &SyncMetadataUpdate) -> SyncMetadata {
    if let Some(remote_id) = &update.remote_id {
        current.remote_id = Some(remote_id.clone());
    }
    if let Some(status) = update.sync_status {
        current.sync_status = status;
    }
    if let Some(dirty) = update.is_dirty {
        current.is_dirty = dirty;
    }
    if let Some(last_synced) = update.last_synced {
        current.last_synced = Some(last_synced);
    }
    current
}

/// Helper function to convert a database row to SyncMetadata
pub(crate) fn row_to_metadata(row: SqliteRow) -> Result<SyncMetadata, AppError> {
    row_ref_to_metadata(&row)
}

pub(crate) fn row_ref_to_metadata(row: &SqliteRow) -> Result<SyncMetadata, AppError> {
    let id_str: String = row
        .try_get("entry_id")
        .map_err(|e| AppError::database("Missing metadata entry ID", e))?;
    let entry_id =
        EntryId::from_string(&id_str).map_err(|e| AppError::database("Invalid entry ID", e))?;
    let status: String = row
        .try_get("sync_status")
        .map_err(|e| AppError::database("Missing sync status", e))?;
    let is_dirty: i64 = row
        .try_get("is_dirty")
        .map_err(|e| AppError::database("Missing dirty flag", e))?;
    let remote_id = row.try_get::<Option<String>, _>("remote_id").ok().flatten();
    let last_synced = row.try_get::<Option<i64>, _>("last_synced").ok().flatten();

    Ok(SyncMetadata {
        entry_id,
        remote_id: remote_id.map(RemoteId::new),
        sync_status: status
            .parse::<SyncStatus>()
            .map_err(|e| corrupt("sync status", e))?,
        is_dirty: is_dirty != 0,
        last_synced: last_synced.map(Timestamp::from_millis),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::create_test_db;
    use crate::migrations::run_migrations;
    use crate::queries::entries::insert_entry;
    use lotkeeper_core::ParkingEntry;

    #[tokio::test]
    async fn test_write_and_fetch_metadata() -> Result<(), AppError> {
        let pool = create_test_db().await?;
        run_migrations(&pool).await?;
        let entry = ParkingEntry::new("T", "Trailer", "META01", Timestamp::from_millis(1));
        insert_entry(&pool, &entry).await?;

        let meta = SyncMetadata::new_local(entry.id);
        write_metadata(&pool, &meta).await?;
        assert_eq!(fetch_metadata(&pool, entry.id).await?, Some(meta.clone()));

        let synced = merge_update(meta, &SyncMetadataUpdate::synced(Some(RemoteId::new("r-1"))));
        write_metadata(&pool, &synced).await?;
        let fetched = fetch_metadata(&pool, entry.id).await?.unwrap();
        assert!(fetched.is_synced());
        assert_eq!(fetched.remote_id, Some(RemoteId::new("r-1")));
        Ok(())
    }

    #[tokio::test]
    async fn test_local_edit_keeps_conflict_status() -> Result<(), AppError> {
        let pool = create_test_db().await?;
        run_migrations(&pool).await?;
        let entry = ParkingEntry::new("T", "Trailer", "META02", Timestamp::from_millis(1));
        insert_entry(&pool, &entry).await?;

        let mut meta = SyncMetadata::new_local(entry.id);
        meta.sync_status = SyncStatus::Conflict;
        meta.is_dirty = false;
        write_metadata(&pool, &meta).await?;

        mark_local_edit(&pool, entry.id).await?;
        let fetched = fetch_metadata(&pool, entry.id).await?.unwrap();
        assert_eq!(fetched.sync_status, SyncStatus::Conflict);
        assert!(fetched.is_dirty);
        assert_eq!(conflicted_ids(&pool).await?, vec![entry.id]);
        Ok(())
    }

    #[test]
    fn test_merge_update_only_touches_set_fields() {
        let meta = SyncMetadata::new_local(EntryId::new());
        let merged = merge_update(meta.clone(), &SyncMetadataUpdate::syncing());
        assert_eq!(merged.sync_status, SyncStatus::Syncing);
        assert!(merged.is_dirty);
        assert_eq!(merged.remote_id, meta.remote_id);
    }
}
