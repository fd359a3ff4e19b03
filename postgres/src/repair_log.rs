//! Repair log for compensations that could not complete inline.
//!
//! Provides persistent storage of the rollbacks and reconciliations the
//! coordinator had to defer, so the reconciler can finish them even after
//! the service that recorded them is gone. Resolved entries are kept for
//! audit.

use crate::error::{corrupted, from_db_int, store_error};
use chrono::{DateTime, Utc};
use seatkeeper_core::error::StoreError;
use seatkeeper_core::store::{Repair, RepairEntry, RepairId, RepairLog, StoreFuture};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Status of a repair row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStatus {
    /// Waiting for the reconciler
    Pending,
    /// Completed
    Resolved,
}

impl RepairStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            _ => Err(corrupted(format!("Invalid repair status: {s}"))),
        }
    }
}

/// `PostgreSQL`-based [`RepairLog`].
///
/// # Example
///
/// ```no_run
/// use seatkeeper_postgres::PostgresRepairLog;
/// use seatkeeper_core::store::RepairLog;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let repairs = PostgresRepairLog::new(pool);
///
/// let pending = repairs.pending(100).await?;
/// println!("Pending repairs: {}", pending.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresRepairLog {
    pool: PgPool,
}

impl PostgresRepairLog {
    /// Create a new repair log with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Status of one entry, for operators and tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no entry has this id.
    pub async fn status(&self, id: RepairId) -> Result<RepairStatus, StoreError> {
        let (status,): (String,) = sqlx::query_as("SELECT status FROM repairs WHERE id = $1")
            .bind(id.get())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("repair_status", e))?;

        RepairStatus::parse(&status)
    }

    /// Convert a database row to a `RepairEntry`.
    fn row_to_entry(row: &PgRow) -> Result<RepairEntry, StoreError> {
        let decode = |e| store_error("decode_repair", e);

        let id: i64 = row.try_get("id").map_err(decode)?;
        let payload: serde_json::Value = row.try_get("payload").map_err(decode)?;
        let repair: Repair = serde_json::from_value(payload)
            .map_err(|e| corrupted(format!("repair {id} has an unreadable payload: {e}")))?;
        let attempts: i32 = row.try_get("attempts").map_err(decode)?;
        let recorded_at: DateTime<Utc> = row.try_get("recorded_at").map_err(decode)?;

        Ok(RepairEntry {
            id: RepairId::new(id),
            repair,
            attempts: from_db_int("attempts", attempts)?,
            last_error: row.try_get("last_error").map_err(decode)?,
            recorded_at,
        })
    }

    async fn set_resolved(&self, id: RepairId) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE repairs
            SET status = 'resolved', resolved_at = NOW(), last_attempt_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("resolve_repair", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("repair {id}")));
        }
        tracing::debug!(repair_id = %id, "Repair marked as resolved");
        Ok(())
    }

    async fn set_failed(&self, id: RepairId, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE repairs
            SET attempts = attempts + 1, last_error = $2, last_attempt_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id.get())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("fail_repair", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("repair {id}")));
        }
        Ok(())
    }
}

impl RepairLog for PostgresRepairLog {
    fn record(&self, repair: Repair) -> StoreFuture<'_, RepairId> {
        Box::pin(async move {
            let payload = serde_json::to_value(&repair)
                .map_err(|e| corrupted(format!("repair could not be serialised: {e}")))?;

            let (id,): (i64,) = sqlx::query_as(
                r"
                INSERT INTO repairs (kind, event_id, payload)
                VALUES ($1, $2, $3)
                RETURNING id
                ",
            )
            .bind(repair.kind())
            .bind(repair.event_id().as_uuid())
            .bind(payload)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("record_repair", e))?;

            tracing::debug!(
                repair_id = id,
                kind = repair.kind(),
                event_id = %repair.event_id(),
                "Repair recorded"
            );
            Ok(RepairId::new(id))
        })
    }

    fn pending(&self, limit: usize) -> StoreFuture<'_, Vec<RepairEntry>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = sqlx::query(
                r"
                SELECT id, payload, attempts, last_error, recorded_at
                FROM repairs
                WHERE status = 'pending'
                ORDER BY id ASC
                LIMIT $1
                ",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("pending_repairs", e))?;

            rows.iter().map(Self::row_to_entry).collect()
        })
    }

    fn mark_resolved(&self, id: RepairId) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.set_resolved(id).await })
    }

    fn mark_failed(&self, id: RepairId, error: String) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.set_failed(id, &error).await })
    }

    fn count_pending(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as(
                r"
                SELECT COUNT(*)
                FROM repairs
                WHERE status = 'pending'
                ",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("count_repairs", e))?;

            u64::try_from(count).map_err(|_| corrupted(format!("negative count {count}")))
        })
    }
}
