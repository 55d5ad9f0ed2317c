//! Aggregate statistics over live entries

use crate::DbPool;
use lotkeeper_core::{AppError, EntryStatistics, GroupStats, Money};
use sqlx::Row;
use std::collections::BTreeMap;

/// Computes totals plus per vehicle type and per payment status breakdowns.
///
/// Income counts Paid entries only. Vehicle type revenue is paid income;
/// payment status revenue is the fees billed in that status.
pub async fn get_statistics(pool: &DbPool) -> Result<EntryStatistics, AppError> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN status = 'Parked' THEN 1 ELSE 0 END), 0) AS parked,
            COALESCE(SUM(CASE WHEN status = 'Exited' THEN 1 ELSE 0 END), 0) AS exited,
            COALESCE(SUM(CASE WHEN payment_status = 'Unpaid' THEN 1 ELSE 0 END), 0) AS unpaid,
            COALESCE(SUM(CASE WHEN payment_status = 'Paid' THEN parking_fee ELSE 0 END), 0) AS income,
            COALESCE(SUM(parking_fee), 0) AS billed
        FROM parking_entries
        WHERE deleted_at IS NULL
        "#,
    )
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::database("Failed to compute statistics", e))?;

    let get = |name: &str| -> Result<i64, AppError> {
        row.try_get::<i64, _>(name)
            .map_err(|e| AppError::database(format!("Missing statistic {}", name), e))
    };

    let by_vehicle_type = grouped(
        pool,
        r#"
        SELECT vehicle_type AS grp, COUNT(*) AS cnt,
               COALESCE(SUM(CASE WHEN payment_status = 'Paid' THEN parking_fee ELSE 0 END), 0) AS revenue
        FROM parking_entries
        WHERE deleted_at IS NULL
        GROUP BY vehicle_type
        "#,
    )
    .await?;

    let by_payment_status = grouped(
        pool,
        r#"
        SELECT payment_status AS grp, COUNT(*) AS cnt, COALESCE(SUM(parking_fee), 0) AS revenue
        FROM parking_entries
        WHERE deleted_at IS NULL
        GROUP BY payment_status
        "#,
    )
    .await?;

    Ok(EntryStatistics {
        total_entries: get("total")? as u64,
        parked: get("parked")? as u64,
        exited: get("exited")? as u64,
        unpaid: get("unpaid")? as u64,
        total_income: Money::from_minor(get("income")?),
        billed_total: Money::from_minor(get("billed")?),
        by_vehicle_type,
        by_payment_status,
    })
}

async fn grouped(pool: &DbPool, sql: &str) -> Result<BTreeMap<String, GroupStats>, AppError> {
    let rows = sqlx::query(sql)
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::database("Failed to compute grouped statistics", e))?;

    rows.into_iter()
        .map(|row| {
            let group: String = row
                .try_get("grp")
                .map_err(|e| AppError::database("Missing group", e))?;
            let count: i64 = row
                .try_get("cnt")
                .map_err(|e| AppError::database("Missing group count", e))?;
            let revenue: i64 = row
                .try_get("revenue")
                .map_err(|e| AppError::database("Missing group revenue", e))?;
            Ok((
                group,
                GroupStats {
                    count: count as u64,
                    revenue: Money::from_minor(revenue),
                },
            ))
        })
        .collect()
}
