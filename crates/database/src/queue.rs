//! Durable operation queue
//!
//! Mutations waiting to reach the remote service. Operations on one entry are
//! handed out strictly in enqueue order: an operation is not ready while an
//! earlier one for the same target is pending, processing or terminally failed.

use crate::queries::entries::corrupt;
use crate::DbPool;
use lotkeeper_core::{
    AppError, EntryId, FailureOutcome, OperationId, OperationStatus, OperationType, QueueStatus,
    QueuedOperation, Timestamp,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::time::Duration;

/// Default attempt ceiling before an operation turns terminal
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const SELECT_OPERATION: &str = r#"
    SELECT seq, id, operation_type, target_id, payload, priority, status,
           attempts, next_retry_at, last_error, enqueued_at, updated_at
    FROM operation_queue
"#;

#[derive(Debug, Clone)]
pub struct OperationQueue {
    pool: DbPool,
    max_attempts: u32,
}

impl OperationQueue {
    pub fn new(pool: DbPool) -> Self {
        Self::with_max_attempts(pool, DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(pool: DbPool, max_attempts: u32) -> Self {
        Self {
            pool,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Appends an operation; `priority` defaults to the type's priority
    pub async fn enqueue(
        &self,
        operation_type: OperationType,
        target: EntryId,
        payload: &str,
        priority: Option<i32>,
    ) -> Result<OperationId, AppError> {
        let id = OperationId::new();
        let now = Timestamp::now();
        let priority = priority.unwrap_or_else(|| operation_type.default_priority());

        sqlx::query(
            r#"
            INSERT INTO operation_queue (
                id, operation_type, target_id, payload, priority, status,
                attempts, next_retry_at, last_error, enqueued_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, NULL, ?, ?)
            "#,
        )
        .bind(id.as_string())
        .bind(operation_type.as_str())
        .bind(target.as_string())
        .bind(payload)
        .bind(priority)
        .bind(now.as_millis())
        .bind(now.as_millis())
        .bind(now.as_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to enqueue operation", e))?;

        log::debug!("Enqueued {} for entry {} as {}", operation_type, target, id);
        Ok(id)
    }

    /// Up to `limit` ready operations, by priority then enqueue order
    pub async fn dequeue_ready(&self, limit: usize) -> Result<Vec<QueuedOperation>, AppError> {
        let sql = format!(
            r#"{} AS q
            WHERE q.status = 'pending'
              AND q.next_retry_at <= ?
              AND NOT EXISTS (
                  SELECT 1 FROM operation_queue p
                  WHERE p.target_id = q.target_id
                    AND p.seq < q.seq
                    AND p.status IN ('pending', 'processing', 'failed')
              )
            ORDER BY q.priority ASC, q.seq ASC
            LIMIT ?"#,
            SELECT_OPERATION
        );

        let rows = sqlx::query(&sql)
            .bind(Timestamp::now().as_millis())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database("Failed to dequeue operations", e))?;

        rows.into_iter().map(row_to_operation).collect()
    }

    /// Claims a pending operation
    pub async fn mark_processing(&self, id: OperationId) -> Result<(), AppError> {
        self.transition(id, "status = 'pending'", "status = 'processing'")
            .await
    }

    pub async fn mark_completed(&self, id: OperationId) -> Result<(), AppError> {
        self.transition(
            id,
            "status IN ('pending', 'processing')",
            "status = 'completed', last_error = NULL",
        )
        .await
    }

    /// Records a failed attempt.
    ///
    /// Charges one attempt; at the ceiling the operation turns terminal,
    /// otherwise it becomes eligible again after `delay`.
    pub async fn mark_failed(
        &self,
        id: OperationId,
        error: &str,
        delay: Duration,
    ) -> Result<FailureOutcome, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database("Failed to begin transaction", e))?;

        let attempts: Option<i64> =
            sqlx::query_scalar("SELECT attempts FROM operation_queue WHERE id = ?")
                .bind(id.as_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| AppError::database("Failed to read operation", e))?;
        let attempts = attempts.ok_or_else(|| AppError::not_found("Operation", id.to_string()))?;
        let attempts = u32::try_from(attempts + 1).unwrap_or(u32::MAX);

        let now = Timestamp::now();
        let outcome = if attempts >= self.max_attempts {
            FailureOutcome::Terminal { attempts }
        } else {
            let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
            FailureOutcome::Retrying {
                attempts,
                next_retry_at: now.plus_millis(delay_ms),
            }
        };
        let (status, next_retry_at) = match outcome {
            FailureOutcome::Terminal { .. } => (OperationStatus::Failed, now),
            FailureOutcome::Retrying { next_retry_at, .. } => {
                (OperationStatus::Pending, next_retry_at)
            }
        };

        sqlx::query(
            r#"
            UPDATE operation_queue
            SET status = ?, attempts = ?, next_retry_at = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(attempts as i64)
        .bind(next_retry_at.as_millis())
        .bind(error)
        .bind(now.as_millis())
        .bind(id.as_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database("Failed to record operation failure", e))?;

        tx.commit()
            .await
            .map_err(|e| AppError::database("Failed to commit transaction", e))?;

        if outcome.is_terminal() {
            log::warn!("Operation {} failed terminally after {} attempts: {}", id, attempts, error);
        }
        Ok(outcome)
    }

    /// Terminal failure without further attempts, for rejections the remote will never accept
    pub async fn mark_failed_permanently(
        &self,
        id: OperationId,
        error: &str,
    ) -> Result<FailureOutcome, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE operation_queue
            SET status = 'failed', attempts = attempts + 1, last_error = ?, updated_at = ?
            WHERE id = ?
            RETURNING attempts
            "#,
        )
        .bind(error)
        .bind(Timestamp::now().as_millis())
        .bind(id.as_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to record permanent failure", e))?;

        let row = result.ok_or_else(|| AppError::not_found("Operation", id.to_string()))?;
        let attempts: i64 = row
            .try_get("attempts")
            .map_err(|e| AppError::database("Missing attempts", e))?;

        log::warn!("Operation {} rejected permanently: {}", id, error);
        Ok(FailureOutcome::Terminal {
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        })
    }

    /// Returns a processing operation to pending without charging an attempt
    pub async fn release(&self, id: OperationId) -> Result<(), AppError> {
        self.transition(id, "status = 'processing'", "status = 'pending'")
            .await
    }

    /// Moves operations left `processing` by a crash back to pending
    pub async fn recover_in_flight(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE operation_queue SET status = 'pending', updated_at = ? WHERE status = 'processing'",
        )
        .bind(Timestamp::now().as_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to recover in-flight operations", e))?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            log::info!("Recovered {} in-flight operations", recovered);
        }
        Ok(recovered)
    }

    /// Re-arms a terminal operation with a fresh attempt budget
    pub async fn retry_terminal(&self, id: OperationId) -> Result<(), AppError> {
        let now = Timestamp::now().as_millis();
        let result = sqlx::query(
            r#"
            UPDATE operation_queue
            SET status = 'pending', attempts = 0, next_retry_at = ?, updated_at = ?
            WHERE id = ? AND status = 'failed'
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id.as_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to re-arm operation", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Failed operation", id.to_string()));
        }
        Ok(())
    }

    /// Retires pending operations of `target` whose changes were overridden.
    ///
    /// They are recorded as completed; terminal failures are left alone.
    pub async fn supersede_pending(&self, target: EntryId) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE operation_queue
            SET status = 'completed', last_error = 'superseded', updated_at = ?
            WHERE target_id = ? AND status = 'pending'
            "#,
        )
        .bind(Timestamp::now().as_millis())
        .bind(target.as_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to supersede operations", e))?;

        Ok(result.rows_affected())
    }

    /// Terminal operations, oldest first
    pub async fn list_failed(&self) -> Result<Vec<QueuedOperation>, AppError> {
        let sql = format!("{} WHERE status = 'failed' ORDER BY seq ASC", SELECT_OPERATION);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database("Failed to list failed operations", e))?;

        rows.into_iter().map(row_to_operation).collect()
    }

    /// Whether `target` has an operation that is not completed
    pub async fn has_outstanding(&self, target: EntryId) -> Result<bool, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM operation_queue WHERE target_id = ? AND status != 'completed'",
        )
        .bind(target.as_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to check outstanding operations", e))?;

        Ok(count > 0)
    }

    /// Deletes completed operations last touched before `older_than`
    pub async fn purge_completed(&self, older_than: Timestamp) -> Result<u64, AppError> {
        let result = sqlx::query(
            "DELETE FROM operation_queue WHERE status = 'completed' AND updated_at < ?",
        )
        .bind(older_than.as_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to purge completed operations", e))?;

        Ok(result.rows_affected())
    }

    pub async fn get(&self, id: OperationId) -> Result<QueuedOperation, AppError> {
        let sql = format!("{} WHERE id = ?", SELECT_OPERATION);
        sqlx::query(&sql)
            .bind(id.as_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database("Failed to fetch operation", e))?
            .map(row_to_operation)
            .transpose()?
            .ok_or_else(|| AppError::not_found("Operation", id.to_string()))
    }

    pub async fn status(&self) -> Result<QueueStatus, AppError> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN status = 'pending' AND next_retry_at <= ? THEN 1 ELSE 0 END), 0) AS ready,
                COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0) AS processing,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed
            FROM operation_queue
            "#,
        )
        .bind(Timestamp::now().as_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database("Failed to read queue status", e))?;

        let count = |column: &str| -> Result<u64, AppError> {
            let value: i64 = row
                .try_get(column)
                .map_err(|e| AppError::database(format!("Missing {} count", column), e))?;
            Ok(value.max(0) as u64)
        };

        let pending = count("pending")?;
        let processing = count("processing")?;
        let failed = count("failed")?;
        Ok(QueueStatus {
            queue_size: pending + processing + failed,
            pending,
            ready: count("ready")?,
            processing,
            completed: count("completed")?,
            failed,
        })
    }

    async fn transition(&self, id: OperationId, from: &str, set: &str) -> Result<(), AppError> {
        let sql = format!(
            "UPDATE operation_queue SET {}, updated_at = ? WHERE id = ? AND {}",
            set, from
        );
        let result = sqlx::query(&sql)
            .bind(Timestamp::now().as_millis())
            .bind(id.as_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database("Failed to update operation", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Operation", id.to_string()));
        }
        Ok(())
    }
}

fn row_to_operation(row: SqliteRow) -> Result<QueuedOperation, AppError> {
    let get_i64 = |column: &str| -> Result<i64, AppError> {
        row.try_get(column)
            .map_err(|e| AppError::database(format!("Missing operation {}", column), e))
    };
    let get_str = |column: &str| -> Result<String, AppError> {
        row.try_get(column)
            .map_err(|e| AppError::database(format!("Missing operation {}", column), e))
    };

    let id = OperationId::from_string(&get_str("id")?)
        .map_err(|e| AppError::database("Invalid operation ID", e))?;
    let target = EntryId::from_string(&get_str("target_id")?)
        .map_err(|e| AppError::database("Invalid target ID", e))?;

    Ok(QueuedOperation {
        id,
        seq: get_i64("seq")?,
        operation_type: get_str("operation_type")?
            .parse()
            .map_err(|e| corrupt("operation type", e))?,
        target,
        payload: get_str("payload")?,
        priority: i32::try_from(get_i64("priority")?).map_err(|e| corrupt("priority", e))?,
        status: get_str("status")?
            .parse()
            .map_err(|e| corrupt("operation status", e))?,
        attempts: u32::try_from(get_i64("attempts")?).map_err(|e| corrupt("attempts", e))?,
        next_retry_at: Timestamp::from_millis(get_i64("next_retry_at")?),
        last_error: row.try_get::<Option<String>, _>("last_error").ok().flatten(),
        enqueued_at: Timestamp::from_millis(get_i64("enqueued_at")?),
        updated_at: Timestamp::from_millis(get_i64("updated_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::create_test_db;
    use crate::migrations::run_queue_migrations;

    async fn queue(max_attempts: u32) -> OperationQueue {
        let pool = create_test_db().await.unwrap();
        run_queue_migrations(&pool).await.unwrap();
        OperationQueue::with_max_attempts(pool, max_attempts)
    }

    #[tokio::test]
    async fn test_priority_then_enqueue_order() -> Result<(), AppError> {
        let queue = queue(5).await;
        let a = queue.enqueue(OperationType::Update, EntryId::new(), "{}", Some(2)).await?;
        let b = queue.enqueue(OperationType::Create, EntryId::new(), "{}", Some(1)).await?;
        let c = queue.enqueue(OperationType::Create, EntryId::new(), "{}", Some(1)).await?;

        let ready: Vec<_> = queue.dequeue_ready(10).await?.into_iter().map(|op| op.id).collect();
        assert_eq!(ready, vec![b, c, a]);
        Ok(())
    }

    #[tokio::test]
    async fn test_same_target_is_fifo() -> Result<(), AppError> {
        let queue = queue(5).await;
        let target = EntryId::new();
        let first = queue.enqueue(OperationType::Update, target, "{}", Some(2)).await?;
        let second = queue.enqueue(OperationType::Delete, target, "{}", Some(1)).await?;

        let ready = queue.dequeue_ready(10).await?;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, first);

        queue.mark_processing(first).await?;
        assert!(queue.dequeue_ready(10).await?.is_empty());

        queue.mark_completed(first).await?;
        let ready = queue.dequeue_ready(10).await?;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, second);
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_backoff_hides_operation() -> Result<(), AppError> {
        let queue = queue(5).await;
        let id = queue.enqueue(OperationType::Create, EntryId::new(), "{}", None).await?;
        queue.mark_processing(id).await?;

        let outcome = queue.mark_failed(id, "timeout", Duration::from_secs(60)).await?;
        assert!(matches!(outcome, FailureOutcome::Retrying { attempts: 1, .. }));
        assert!(queue.dequeue_ready(10).await?.is_empty());

        let op = queue.get(id).await?;
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.last_error.as_deref(), Some("timeout"));

        let status = queue.status().await?;
        assert_eq!(status.pending, 1);
        assert_eq!(status.ready, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_attempt_ceiling_is_terminal() -> Result<(), AppError> {
        let queue = queue(2).await;
        let id = queue.enqueue(OperationType::Create, EntryId::new(), "{}", None).await?;

        let first = queue.mark_failed(id, "503", Duration::ZERO).await?;
        assert!(!first.is_terminal());
        let second = queue.mark_failed(id, "503", Duration::ZERO).await?;
        assert_eq!(second, FailureOutcome::Terminal { attempts: 2 });

        let status = queue.status().await?;
        assert_eq!(status.failed, 1);
        assert_eq!(status.queue_size, 1);
        assert_eq!(queue.list_failed().await?.len(), 1);
        assert!(queue.has_outstanding(queue.get(id).await?.target).await?);

        queue.retry_terminal(id).await?;
        let op = queue.get(id).await?;
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_terminal_failure_blocks_later_operations() -> Result<(), AppError> {
        let queue = queue(5).await;
        let target = EntryId::new();
        let create = queue.enqueue(OperationType::Create, target, "{}", None).await?;
        queue.enqueue(OperationType::Update, target, "{}", None).await?;

        queue.mark_failed_permanently(create, "400 bad request").await?;
        assert!(queue.dequeue_ready(10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_release_and_recover() -> Result<(), AppError> {
        let queue = queue(5).await;
        let a = queue.enqueue(OperationType::Create, EntryId::new(), "{}", None).await?;
        let b = queue.enqueue(OperationType::Create, EntryId::new(), "{}", None).await?;
        queue.mark_processing(a).await?;
        queue.mark_processing(b).await?;

        queue.release(a).await?;
        assert_eq!(queue.get(a).await?.attempts, 0);
        assert_eq!(queue.recover_in_flight().await?, 1);
        assert_eq!(queue.dequeue_ready(10).await?.len(), 2);

        assert!(matches!(
            queue.release(a).await,
            Err(AppError::RecordNotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_only_touches_completed() -> Result<(), AppError> {
        let queue = queue(5).await;
        let done = queue.enqueue(OperationType::Create, EntryId::new(), "{}", None).await?;
        let open = queue.enqueue(OperationType::Create, EntryId::new(), "{}", None).await?;
        queue.mark_completed(done).await?;

        let purged = queue
            .purge_completed(Timestamp::now().plus_millis(1_000))
            .await?;
        assert_eq!(purged, 1);
        assert!(queue.get(done).await.is_err());
        assert!(queue.get(open).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let queue = queue(5).await;
        let err = queue
            .mark_failed(OperationId::new(), "x", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RecordNotFound { .. }));
    }
}
