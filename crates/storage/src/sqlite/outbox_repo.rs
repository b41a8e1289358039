use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{conn, ser, u32_from_i64};
use crate::repository::{
    DeliveryFailure, OutboxEntry, OutboxIntent, OutboxRepository, OutboxStatus, StorageError,
};

fn map_entry_row(row: &SqliteRow) -> Result<OutboxEntry, StorageError> {
    let payload: String = row.try_get("payload").map_err(ser)?;
    let intent: OutboxIntent = serde_json::from_str(&payload).map_err(ser)?;
    let status: String = row.try_get("status").map_err(ser)?;
    Ok(OutboxEntry {
        id: row.try_get("id").map_err(ser)?,
        intent,
        status: status.parse()?,
        attempts: u32_from_i64("attempts", row.try_get::<i64, _>("attempts").map_err(ser)?)?,
        created_at: row.try_get("created_at").map_err(ser)?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(ser)?,
        delivered_at: row.try_get("delivered_at").map_err(ser)?,
        last_error: row.try_get("last_error").map_err(ser)?,
    })
}

fn ensure_updated(rows_affected: u64) -> Result<(), StorageError> {
    if rows_affected == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

impl SqliteRepository {
    async fn park(&self, id: i64, error: &str) -> Result<(), StorageError> {
        let res = sqlx::query(
            "UPDATE progress_outbox SET status = ?2, last_error = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(OutboxStatus::Dead.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        ensure_updated(res.rows_affected())
    }
}

#[async_trait::async_trait]
impl OutboxRepository for SqliteRepository {
    async fn enqueue(&self, intent: &OutboxIntent, at: DateTime<Utc>) -> Result<i64, StorageError> {
        let payload = serde_json::to_string(intent).map_err(ser)?;
        let res = sqlx::query(
            r"
            INSERT INTO progress_outbox (payload, status, attempts, created_at, next_attempt_at)
            VALUES (?1, ?2, 0, ?3, ?3)
            ",
        )
        .bind(payload)
        .bind(OutboxStatus::Pending.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(res.last_insert_rowid())
    }

    async fn due_entries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxEntry>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, payload, status, attempts, created_at, next_attempt_at, delivered_at, last_error
            FROM progress_outbox
            WHERE status = ?1 AND next_attempt_at <= ?2
            ORDER BY id ASC
            LIMIT ?3
            ",
        )
        .bind(OutboxStatus::Pending.as_str())
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            match map_entry_row(row) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    let id: i64 = row.try_get("id").map_err(ser)?;
                    tracing::warn!(entry_id = id, error = %err, "parking undecodable outbox entry");
                    self.park(id, &err.to_string()).await?;
                }
            }
        }
        Ok(entries)
    }

    async fn mark_delivered(&self, id: i64, at: DateTime<Utc>) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE progress_outbox
            SET status = ?2, attempts = attempts + 1, delivered_at = ?3, last_error = NULL
            WHERE id = ?1
            ",
        )
        .bind(id)
        .bind(OutboxStatus::Delivered.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        ensure_updated(res.rows_affected())
    }

    async fn record_failure(&self, id: i64, failure: &DeliveryFailure) -> Result<(), StorageError> {
        let status = if failure.give_up {
            OutboxStatus::Dead
        } else {
            OutboxStatus::Pending
        };
        let res = sqlx::query(
            r"
            UPDATE progress_outbox
            SET status = ?2, attempts = attempts + 1, next_attempt_at = ?3, last_error = ?4
            WHERE id = ?1
            ",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(failure.next_attempt_at)
        .bind(&failure.error)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        ensure_updated(res.rows_affected())
    }

    async fn count_by_status(&self, status: OutboxStatus) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM progress_outbox WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(conn)?
            .try_get("n")
            .map_err(ser)?;
        u64::try_from(count).map_err(ser)
    }

    async fn prune_delivered(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let res = sqlx::query(
            "DELETE FROM progress_outbox WHERE status = ?1 AND delivered_at < ?2",
        )
        .bind(OutboxStatus::Delivered.as_str())
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(res.rows_affected())
    }
}
