//! Database migrations
//!
//! The record store and the operation queue live in separate files, each
//! with its own `schema_migrations` table. Rows are keyed by scope as well
//! as version so both schemas can share one file. Every migration runs in a
//! transaction together with the insert of its version row, so a failed
//! migration leaves no partial schema behind.

use crate::DbPool;
use lotkeeper_core::AppError;

/// Record store schema scope
pub const PARKING_SCOPE: &str = "parking";

/// Operation queue schema scope
pub const QUEUE_SCOPE: &str = "queue";

/// A versioned schema change
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Schema of the record store database
pub const PARKING_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: include_str!("../migrations/parking/001_initial_schema.sql"),
    },
    Migration {
        version: 2,
        name: "add_indexes",
        sql: include_str!("../migrations/parking/002_add_indexes.sql"),
    },
];

/// Schema of the operation queue database
pub const QUEUE_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "operation_queue",
    sql: include_str!("../migrations/queue/001_operation_queue.sql"),
}];

/// Latest record store schema version
pub fn current_version() -> i64 {
    PARKING_MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Runs pending record store migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), AppError> {
    apply_migrations(pool, PARKING_SCOPE, PARKING_MIGRATIONS).await
}

/// Runs pending operation queue migrations
pub async fn run_queue_migrations(pool: &DbPool) -> Result<(), AppError> {
    apply_migrations(pool, QUEUE_SCOPE, QUEUE_MIGRATIONS).await
}

/// Applies every migration in `migrations` not yet recorded in `schema_migrations`
pub async fn apply_migrations(
    pool: &DbPool,
    scope: &str,
    migrations: &[Migration],
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            scope TEXT NOT NULL,
            version INTEGER NOT NULL,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000),
            PRIMARY KEY (scope, version)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| AppError::database("Failed to create migrations table", e))?;

    for migration in migrations {
        run_migration(pool, scope, migration).await?;
    }

    Ok(())
}

/// Runs a single migration if not already applied
async fn run_migration(pool: &DbPool, scope: &str, migration: &Migration) -> Result<(), AppError> {
    let applied: Option<i64> =
        sqlx::query_scalar("SELECT version FROM schema_migrations WHERE scope = ? AND version = ?")
            .bind(scope)
            .bind(migration.version)
            .fetch_optional(pool)
            .await
            .map_err(|e| AppError::database("Failed to check migration status", e))?;

    if applied.is_some() {
        return Ok(());
    }

    let failed = |reason: String| AppError::MigrationFailed {
        version: format!("{}/{:03}_{}", scope, migration.version, migration.name),
        reason,
    };

    let mut tx = pool.begin().await.map_err(|e| failed(e.to_string()))?;

    sqlx::raw_sql(migration.sql)
        .execute(&mut *tx)
        .await
        .map_err(|e| failed(e.to_string()))?;

    sqlx::query("INSERT INTO schema_migrations (scope, version, name) VALUES (?, ?, ?)")
        .bind(scope)
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await
        .map_err(|e| failed(e.to_string()))?;

    tx.commit().await.map_err(|e| failed(e.to_string()))?;

    log::info!(
        "Applied {} migration {:03}_{}",
        scope,
        migration.version,
        migration.name
    );
    Ok(())
}

/// Versions of `scope` recorded as applied, ascending
pub async fn applied_versions(pool: &DbPool, scope: &str) -> Result<Vec<i64>, AppError> {
    sqlx::query_scalar("SELECT version FROM schema_migrations WHERE scope = ? ORDER BY version")
        .bind(scope)
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::database("Failed to read applied migrations", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::create_test_db;

    #[tokio::test]
    async fn test_run_migrations_records_versions() {
        let pool = create_test_db().await.unwrap();
        run_migrations(&pool).await.unwrap();

        assert_eq!(applied_versions(&pool, PARKING_SCOPE).await.unwrap(), vec![1, 2]);
        assert_eq!(current_version(), 2);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = create_test_db().await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        assert_eq!(applied_versions(&pool, PARKING_SCOPE).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_queue_migrations() {
        let pool = create_test_db().await.unwrap();
        run_queue_migrations(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM operation_queue")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(applied_versions(&pool, QUEUE_SCOPE).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_both_schemas_share_one_file() {
        let pool = create_test_db().await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_queue_migrations(&pool).await.unwrap();

        assert_eq!(applied_versions(&pool, PARKING_SCOPE).await.unwrap(), vec![1, 2]);
        assert_eq!(applied_versions(&pool, QUEUE_SCOPE).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_failed_migration_leaves_no_version() {
        const BROKEN: &[Migration] = &[Migration {
            version: 1,
            name: "broken",
            sql: "CREATE TABLE ok_table (x INTEGER); CREATE TABLE (",
        }];
        let pool = create_test_db().await.unwrap();

        let err = apply_migrations(&pool, "test", BROKEN).await.unwrap_err();
        assert!(matches!(err, AppError::MigrationFailed { .. }));
        assert!(applied_versions(&pool, "test").await.unwrap().is_empty());

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'ok_table'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 0);
    }
}
