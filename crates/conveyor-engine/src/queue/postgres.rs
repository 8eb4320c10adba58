//! PostgreSQL implementation of TaskQueue
//!
//! Table-backed queue claimed with `FOR UPDATE SKIP LOCKED`, so many
//! workers can poll concurrently without contending on the same row.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::{LeasedMessage, QueueError, TaskQueue};

/// PostgreSQL implementation of TaskQueue
///
/// May share a pool with [`PostgresExecutionStore`](crate::store::PostgresExecutionStore)
/// or run against a dedicated queue database.
#[derive(Clone)]
pub struct PostgresTaskQueue {
    pool: PgPool,
}

impl PostgresTaskQueue {
    /// Create a new PostgreSQL queue with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    #[instrument(skip(self))]
    async fn enqueue(
        &self,
        execution_id: Uuid,
        deliver_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO queue_messages (id, execution_id, visible_at)
            VALUES ($1, $2, COALESCE($3, NOW()))
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(execution_id)
        .bind(deliver_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to enqueue: {}", e);
            QueueError::Unavailable(e.to_string())
        })?;

        debug!(%execution_id, ?deliver_at, "enqueued execution");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn dequeue(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<LeasedMessage>, QueueError> {
        // SKIP LOCKED keeps concurrent pollers off the same row; claiming
        // and leasing happen in one atomic statement
        let row = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM queue_messages
                WHERE visible_at <= NOW()
                  AND (leased_until IS NULL OR leased_until <= NOW())
                ORDER BY visible_at, enqueued_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_messages q
            SET lease_token = $1,
                leased_until = NOW() + make_interval(secs => $2)
            FROM claimable c
            WHERE q.id = c.id
            RETURNING q.execution_id, q.lease_token
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to dequeue: {}", e);
            QueueError::Unavailable(e.to_string())
        })?;

        Ok(row.map(|r| LeasedMessage {
            execution_id: r.get("execution_id"),
            lease_token: r.get("lease_token"),
        }))
    }

    #[instrument(skip(self))]
    async fn ack(&self, lease_token: Uuid) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            DELETE FROM queue_messages WHERE lease_token = $1
            "#,
        )
        .bind(lease_token)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownLease(lease_token));
        }

        debug!(%lease_token, "acknowledged message");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn extend(&self, lease_token: Uuid, extra: Duration) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET leased_until = leased_until + make_interval(secs => $2)
            WHERE lease_token = $1 AND leased_until > NOW()
            "#,
        )
        .bind(lease_token)
        .bind(extra.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownLease(lease_token));
        }
        Ok(())
    }
}
