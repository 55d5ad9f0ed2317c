//! Parking entry database operations

use lotkeeper_core::{
    AppError, EntryFilter, EntryId, EntryStatus, Money, NaturalKey, Origin, ParkingEntry,
    PaymentStatus, RemoteId, Timestamp,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite};

/// Entry columns joined with the remote id from its metadata row
pub(crate) const SELECT_ENTRY: &str = r#"
    SELECT e.id, e.transport_name, e.vehicle_type, e.vehicle_number,
           e.driver_name, e.driver_phone, e.payment_type,
           e.entry_time, e.exit_time, e.status, e.parking_fee, e.payment_status,
           e.notes, e.last_modified, e.created_by, e.deleted_at,
           m.entry_id, m.remote_id, m.sync_status, m.is_dirty, m.last_synced
    FROM parking_entries e
    LEFT JOIN sync_metadata m ON m.entry_id = e.id
"#;

/// Maps a write error, turning natural-key collisions into `DuplicateKey`
pub(crate) fn map_write_error(err: sqlx::Error, key: &NaturalKey, context: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::DuplicateKey {
            natural_key: key.to_string(),
        },
        _ => AppError::database(context.to_string(), err),
    }
}

/// Inserts a new entry row
pub async fn insert_entry<'e, E>(executor: E, entry: &ParkingEntry) -> Result<(), AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO parking_entries (
            id, transport_name, vehicle_type, vehicle_number,
            driver_name, driver_phone, payment_type,
            entry_time, exit_time, status, parking_fee, payment_status,
            notes, last_modified, created_by, deleted_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.id.as_string())
    .bind(&entry.transport_name)
    .bind(&entry.vehicle_type)
    .bind(&entry.vehicle_number)
    .bind(&entry.driver_name)
    .bind(&entry.driver_phone)
    .bind(&entry.payment_type)
    .bind(entry.entry_time.as_millis())
    .bind(entry.exit_time.map(|t| t.as_millis()))
    .bind(entry.status.as_str())
    .bind(entry.parking_fee.minor())
    .bind(entry.payment_status.as_str())
    .bind(&entry.notes)
    .bind(entry.last_modified.as_millis())
    .bind(entry.created_by.as_str())
    .bind(entry.deleted_at.map(|t| t.as_millis()))
    .execute(executor)
    .await
    .map_err(|e| map_write_error(e, &entry.natural_key(), "Failed to create entry"))?;

    Ok(())
}

/// Overwrites every mutable column of an existing entry
pub async fn update_entry<'e, E>(executor: E, entry: &ParkingEntry) -> Result<(), AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE parking_entries SET
            transport_name = ?, vehicle_type = ?, vehicle_number = ?,
            driver_name = ?, driver_phone = ?, payment_type = ?,
            entry_time = ?, exit_time = ?, status = ?, parking_fee = ?, payment_status = ?,
            notes = ?, last_modified = ?, deleted_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&entry.transport_name)
    .bind(&entry.vehicle_type)
    .bind(&entry.vehicle_number)
    .bind(&entry.driver_name)
    .bind(&entry.driver_phone)
    .bind(&entry.payment_type)
    .bind(entry.entry_time.as_millis())
    .bind(entry.exit_time.map(|t| t.as_millis()))
    .bind(entry.status.as_str())
    .bind(entry.parking_fee.minor())
    .bind(entry.payment_status.as_str())
    .bind(&entry.notes)
    .bind(entry.last_modified.as_millis())
    .bind(entry.deleted_at.map(|t| t.as_millis()))
    .bind(entry.id.as_string())
    .execute(executor)
    .await
    .map_err(|e| map_write_error(e, &entry.natural_key(), "Failed to update entry"))?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Entry", entry.id.to_string()));
    }
    Ok(())
}

/// Gets an entry by ID, tombstones included
pub async fn fetch_entry<'e, E>(executor: E, id: EntryId) -> Result<Option<ParkingEntry>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE e.id = ?", SELECT_ENTRY);
    sqlx::query(&sql)
        .bind(id.as_string())
        .fetch_optional(executor)
        .await
        .map_err(|e| AppError::database("Failed to fetch entry", e))?
        .map(row_to_entry)
        .transpose()
}

/// Finds an entry by (vehicle number, entry time), tombstones included
pub async fn fetch_by_natural_key<'e, E>(
    executor: E,
    key: &NaturalKey,
) -> Result<Option<SqliteRow>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "{} WHERE e.vehicle_number = ? AND e.entry_time = ?",
        SELECT_ENTRY
    );
    sqlx::query(&sql)
        .bind(&key.vehicle_number)
        .bind(key.entry_time.as_millis())
        .fetch_optional(executor)
        .await
        .map_err(|e| AppError::database("Failed to look up natural key", e))
}

/// Finds the entry linked to a remote id
pub async fn fetch_by_remote_id<'e, E>(
    executor: E,
    remote_id: &RemoteId,
) -> Result<Option<SqliteRow>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE m.remote_id = ?", SELECT_ENTRY);
    sqlx::query(&sql)
        .bind(remote_id.as_str())
        .fetch_optional(executor)
        .await
        .map_err(|e| AppError::database("Failed to look up remote id", e))
}

/// Deletes an entry row; its metadata row goes with it
pub async fn delete_entry<'e, E>(executor: E, id: EntryId) -> Result<u64, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM parking_entries WHERE id = ?")
        .bind(id.as_string())
        .execute(executor)
        .await
        .map_err(|e| AppError::database("Failed to delete entry", e))?;

    Ok(result.rows_affected())
}

/// Lists live entries matching every set field of `filter`, newest entry first
pub async fn list_entries<'e, E>(
    executor: E,
    filter: &EntryFilter,
) -> Result<Vec<ParkingEntry>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_ENTRY);
    qb.push(" WHERE e.deleted_at IS NULL");

    if let Some(status) = filter.status {
        qb.push(" AND e.status = ").push_bind(status.as_str());
    }
    if let Some(vehicle_type) = &filter.vehicle_type {
        qb.push(" AND e.vehicle_type = ").push_bind(vehicle_type.clone());
    }
    if let Some(payment_status) = filter.payment_status {
        qb.push(" AND e.payment_status = ")
            .push_bind(payment_status.as_str());
    }
    if let Some(number) = &filter.vehicle_number {
        let pattern = format!("%{}%", lotkeeper_core::normalize_vehicle_number(number));
        qb.push(" AND e.vehicle_number LIKE ").push_bind(pattern);
    }
    if let Some(from) = filter.entry_from {
        qb.push(" AND e.entry_time >= ").push_bind(from.as_millis());
    }
    if let Some(to) = filter.entry_to {
        qb.push(" AND e.entry_time <= ").push_bind(to.as_millis());
    }
    qb.push(" ORDER BY e.entry_time DESC, e.id ASC");

    let rows = qb
        .build()
        .fetch_all(executor)
        .await
        .map_err(|e| AppError::database("Failed to list entries", e))?;

    rows.into_iter().map(row_to_entry).collect()
}

pub(crate) fn corrupt(field: &str, detail: impl std::fmt::Display) -> AppError {
    AppError::DatabaseError {
        message: format!("Invalid stored {}: {}", field, detail),
        source: None,
    }
}

/// Helper function to convert a database row to a ParkingEntry
pub(crate) fn row_to_entry(row: SqliteRow) -> Result<ParkingEntry, AppError> {
    let id_str: String = row
        .try_get("id")
        .map_err(|e| AppError::database("Missing entry ID", e))?;
    let id = EntryId::from_string(&id_str).map_err(|e| AppError::database("Invalid entry ID", e))?;

    let status: String = row
        .try_get("status")
        .map_err(|e| AppError::database("Missing status", e))?;
    let payment_status: String = row
        .try_get("payment_status")
        .map_err(|e| AppError::database("Missing payment status", e))?;
    let created_by: String = row
        .try_get("created_by")
        .map_err(|e| AppError::database("Missing origin", e))?;

    let entry_time: i64 = row
        .try_get("entry_time")
        .map_err(|e| AppError::database("Missing entry time", e))?;
    let exit_time: Option<i64> = row
        .try_get("exit_time")
        .map_err(|e| AppError::database("Missing exit time", e))?;
    let fee: i64 = row
        .try_get("parking_fee")
        .map_err(|e| AppError::database("Missing parking fee", e))?;
    let last_modified: i64 = row
        .try_get("last_modified")
        .map_err(|e| AppError::database("Missing last modified", e))?;
    let deleted_at = row.try_get::<Option<i64>, _>("deleted_at").ok().flatten();
    let remote_id = row.try_get::<Option<String>, _>("remote_id").ok().flatten();

    Ok(ParkingEntry {
        id,
        remote_id: remote_id.map(RemoteId::new),
        transport_name: row
            .try_get("transport_name")
            .map_err(|e| AppError::database("Missing transport name", e))?,
        vehicle_type: row
            .try_get("vehicle_type")
            .map_err(|e| AppError::database("Missing vehicle type", e))?,
        vehicle_number: row
            .try_get("vehicle_number")
            .map_err(|e| AppError::database("Missing vehicle number", e))?,
        driver_name: row.try_get::<Option<String>, _>("driver_name").ok().flatten(),
        driver_phone: row.try_get::<Option<String>, _>("driver_phone").ok().flatten(),
        payment_type: row.try_get::<Option<String>, _>("payment_type").ok().flatten(),
        entry_time: Timestamp::from_millis(entry_time),
        exit_time: exit_time.map(Timestamp::from_millis),
        status: status
            .parse::<EntryStatus>()
            .map_err(|e| corrupt("status", e))?,
        parking_fee: Money::from_minor(fee),
        payment_status: payment_status
            .parse::<PaymentStatus>()
            .map_err(|e| corrupt("payment status", e))?,
        notes: row
            .try_get("notes")
            .map_err(|e| AppError::database("Missing notes", e))?,
        last_modified: Timestamp::from_millis(last_modified),
        created_by: created_by
            .parse::<Origin>()
            .map_err(|e| corrupt("origin", e))?,
        deleted_at: deleted_at.map(Timestamp::from_millis),
    })
}
