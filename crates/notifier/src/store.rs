//! Notification history persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use beacon_common::error::AppError;
use beacon_common::types::{
    DeliveryStatus, NewNotificationRecord, NotificationRecord, StatusCounts,
};

/// Storage for delivery records. Updates are keyed by record id and idempotent.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a new record in `pending` state with `retry_count = 0`.
    async fn insert(&self, record: &NewNotificationRecord) -> Result<NotificationRecord, AppError>;

    /// Overwrite status and retry count. Last write wins.
    async fn update_delivery(
        &self,
        id: i64,
        status: DeliveryStatus,
        retry_count: i32,
    ) -> Result<(), AppError>;

    async fn get(&self, id: i64) -> Result<Option<NotificationRecord>, AppError>;

    /// Failed records created at or after `since` with retries left.
    async fn failed_since(
        &self,
        since: DateTime<Utc>,
        max_retries: i32,
    ) -> Result<Vec<NotificationRecord>, AppError>;

    /// Most recent records for a user, newest first.
    async fn history(&self, user_id: &str, limit: i64) -> Result<Vec<NotificationRecord>, AppError>;

    /// Counts by status for records created inside the optional window.
    async fn status_counts(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<StatusCounts, AppError>;

    /// Delete records created before `cutoff`. Returns rows removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

/// PostgreSQL-backed store over the `notification_history` table.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert(&self, record: &NewNotificationRecord) -> Result<NotificationRecord, AppError> {
        let row: NotificationRecord = sqlx::query_as(
            r#"
            INSERT INTO notification_history (user_id, target_role, project_id, title, body, delivery_status, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, 0)
            RETURNING *
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.target_role)
        .bind(&record.project_id)
        .bind(&record.title)
        .bind(&record.body)
        .bind(DeliveryStatus::Pending.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn update_delivery(
        &self,
        id: i64,
        status: DeliveryStatus,
        retry_count: i32,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notification_history
            SET delivery_status = $2, retry_count = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(retry_count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Notification {} not found", id)));
        }

        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<NotificationRecord>, AppError> {
        let row: Option<NotificationRecord> =
            sqlx::query_as("SELECT * FROM notification_history WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row)
    }

    async fn failed_since(
        &self,
        since: DateTime<Utc>,
        max_retries: i32,
    ) -> Result<Vec<NotificationRecord>, AppError> {
        let rows: Vec<NotificationRecord> = sqlx::query_as(
            r#"
            SELECT * FROM notification_history
            WHERE delivery_status = $1
              AND retry_count < $2
              AND created_at >= $3
            ORDER BY created_at ASC
            "#,
        )
        .bind(DeliveryStatus::Failed.to_string())
        .bind(max_retries)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn history(&self, user_id: &str, limit: i64) -> Result<Vec<NotificationRecord>, AppError> {
        let rows: Vec<NotificationRecord> = sqlx::query_as(
            r#"
            SELECT * FROM notification_history
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn status_counts(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<StatusCounts, AppError> {
        let rows: Vec<(DeliveryStatus, i64)> = sqlx::query_as(
            r#"
            SELECT delivery_status, COUNT(*)
            FROM notification_history
            WHERE ($1::timestamptz IS NULL OR created_at >= $1)
              AND ($2::timestamptz IS NULL OR created_at <= $2)
            GROUP BY delivery_status
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(status, count.max(0) as u64);
        }
        Ok(counts)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM notification_history WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
