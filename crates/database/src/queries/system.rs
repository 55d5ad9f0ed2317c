//! Key/value settings kept next to the records (sync checkpoint and friends)

use crate::DbPool;
use lotkeeper_core::{AppError, Timestamp};

/// Key under which the pull checkpoint is stored
pub const CHECKPOINT_KEY: &str = "sync.checkpoint";

/// Reads a value
pub async fn get_value(pool: &DbPool, key: &str) -> Result<Option<String>, AppError> {
    sqlx::query_scalar("SELECT value FROM system_metadata WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(|e| AppError::database("Failed to read system metadata", e))
}

/// Writes a value, replacing any previous one
pub async fn set_value(pool: &DbPool, key: &str, value: &str) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO system_metadata (key, value, updated_at) VALUES (?, ?, ?)
        ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(Timestamp::now().as_millis())
    .execute(pool)
    .await
    .map_err(|e| AppError::database("Failed to write system metadata", e))?;

    Ok(())
}
