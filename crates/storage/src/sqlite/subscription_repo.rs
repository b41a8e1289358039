use mentor_core::model::{Subscription, ViewerId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{bool_to_i64, conn, ser, viewer_from_str, viewer_key};
use crate::repository::{StorageError, SubscriptionRepository};

#[async_trait::async_trait]
impl SubscriptionRepository for SqliteRepository {
    async fn get_subscription(
        &self,
        viewer_id: ViewerId,
    ) -> Result<Option<Subscription>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT viewer_id, status, plan, current_period_end, cancel_at_period_end
            FROM subscriptions
            WHERE viewer_id = ?1
            ",
        )
        .bind(viewer_key(viewer_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let viewer: String = row.try_get("viewer_id").map_err(ser)?;
        let status: String = row.try_get("status").map_err(ser)?;
        let plan: String = row.try_get("plan").map_err(ser)?;
        Ok(Some(Subscription {
            viewer_id: viewer_from_str(&viewer)?,
            status: status.parse().map_err(ser)?,
            plan: plan.parse().map_err(ser)?,
            current_period_end: row.try_get("current_period_end").map_err(ser)?,
            cancel_at_period_end: row.try_get::<i64, _>("cancel_at_period_end").map_err(ser)? != 0,
        }))
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO subscriptions (viewer_id, status, plan, current_period_end, cancel_at_period_end)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(viewer_id) DO UPDATE SET
                status = excluded.status,
                plan = excluded.plan,
                current_period_end = excluded.current_period_end,
                cancel_at_period_end = excluded.cancel_at_period_end
            ",
        )
        .bind(viewer_key(subscription.viewer_id))
        .bind(subscription.status.as_str())
        .bind(subscription.plan.as_str())
        .bind(subscription.current_period_end)
        .bind(bool_to_i64(subscription.cancel_at_period_end))
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }
}
