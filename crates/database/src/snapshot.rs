//! Snapshot export and import
//!
//! A snapshot is a versioned JSON document holding every entry, tombstones
//! included, together with its sync metadata.

use crate::queries::{entries, sync_metadata};
use crate::store::RecordStore;
use lotkeeper_core::{AppError, ParkingEntry, SyncMetadata, Timestamp, Validator};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Current snapshot document version
pub const SNAPSHOT_VERSION: u32 = 1;

/// One entry of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub entry: ParkingEntry,
    /// Absent for records produced outside the store; they import as pending and dirty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub version: u32,
    pub exported_at: Timestamp,
    pub entries: Vec<SnapshotRecord>,
}

/// Outcome of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    /// Records whose id or natural key already existed
    pub skipped: usize,
}

impl RecordStore {
    /// Every entry with its metadata, ordered by entry time then id
    pub async fn export_snapshot(&self) -> Result<SnapshotDocument, AppError> {
        let sql = format!("{} ORDER BY e.entry_time ASC, e.id ASC", entries::SELECT_ENTRY);
        let rows = sqlx::query(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| AppError::database("Failed to export entries", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let has_metadata = row
                .try_get::<Option<String>, _>("entry_id")
                .ok()
                .flatten()
                .is_some();
            let sync = if has_metadata {
                Some(sync_metadata::row_ref_to_metadata(&row)?)
            } else {
                None
            };
            records.push(SnapshotRecord {
                entry: entries::row_to_entry(row)?,
                sync,
            });
        }

        Ok(SnapshotDocument {
            version: SNAPSHOT_VERSION,
            exported_at: Timestamp::now(),
            entries: records,
        })
    }

    /// Loads records in one transaction.
    ///
    /// Existing ids and natural keys are skipped; an invalid record aborts
    /// the whole import.
    pub async fn import_snapshot(&self, records: &[SnapshotRecord]) -> Result<ImportReport, AppError> {
        let mut report = ImportReport::default();
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| AppError::database("Failed to begin transaction", e))?;

        for record in records {
            let entry = &record.entry;
            if !entry.is_deleted() {
                entry
                    .validate()
                    .map_err(|errors| AppError::ValidationFailed { errors })?;
            }

            let id_taken = entries::fetch_entry(&mut *tx, entry.id).await?.is_some();
            let key_taken = entries::fetch_by_natural_key(&mut *tx, &entry.natural_key())
                .await?
                .is_some();
            if id_taken || key_taken {
                log::debug!("Skipping snapshot record {} ({})", entry.id, entry.natural_key());
                report.skipped += 1;
                continue;
            }

            let mut meta = record
                .sync
                .clone()
                .unwrap_or_else(|| SyncMetadata::new_local(entry.id));
            meta.entry_id = entry.id;
            if meta.remote_id.is_none() {
                meta.remote_id = entry.remote_id.clone();
            }

            entries::insert_entry(&mut *tx, entry).await?;
            sync_metadata::write_metadata(&mut *tx, &meta).await?;
            report.imported += 1;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::database("Failed to commit import", e))?;

        log::info!(
            "Imported {} snapshot records ({} skipped)",
            report.imported,
            report.skipped
        );
        Ok(report)
    }

    /// Writes a snapshot file atomically
    pub async fn export_to_file(&self, path: impl AsRef<Path>) -> Result<usize, AppError> {
        let document = self.export_snapshot().await?;
        write_snapshot_file(path.as_ref(), &document)?;
        Ok(document.entries.len())
    }

    pub async fn import_from_file(&self, path: impl AsRef<Path>) -> Result<ImportReport, AppError> {
        let document = read_snapshot_file(path.as_ref())?;
        self.import_snapshot(&document.entries).await
    }
}

/// Serializes `document` next to `path` and renames it into place
pub fn write_snapshot_file(path: &Path, document: &SnapshotDocument) -> Result<(), AppError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(document)?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(json.as_bytes())?;
    temp.flush()?;
    temp.persist(path).map_err(|e| AppError::from(e.error))?;
    Ok(())
}

pub fn read_snapshot_file(path: &Path) -> Result<SnapshotDocument, AppError> {
    let content = std::fs::read_to_string(path)?;
    let document: SnapshotDocument = serde_json::from_str(&content)?;

    if document.version != SNAPSHOT_VERSION {
        return Err(AppError::invalid_argument(format!(
            "Unsupported snapshot version {} (expected {})",
            document.version, SNAPSHOT_VERSION
        )));
    }
    Ok(document)
}
