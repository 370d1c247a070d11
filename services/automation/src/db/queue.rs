//! Postgres-backed message queue.
//!
//! Messages live in `queue_messages`. Receiving claims visible rows with
//! `FOR UPDATE SKIP LOCKED`, pushes their `visible_at` forward by the
//! visibility timeout and hands out a fresh receipt, so concurrent consumers
//! never receive the same delivery.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{postgres::PgPool, postgres::PgRow, Row};
use tokio::time::{sleep, Instant};
use tracing::debug;
use uuid::Uuid;

use super::DbError;
use crate::queue::{MessageQueue, QueueError, QueueMessage};

struct MessageRow(QueueMessage);

impl<'r> sqlx::FromRow<'r, PgRow> for MessageRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let message_id: Uuid = row.try_get("message_id")?;
        let receive_count: i32 = row.try_get("receive_count")?;
        Ok(Self(QueueMessage {
            message_id: message_id.to_string(),
            receipt: row.try_get("receipt")?,
            body: row.try_get("body")?,
            receive_count: u32::try_from(receive_count).unwrap_or(0),
        }))
    }
}

/// A named queue stored in Postgres.
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    name: String,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl PgQueue {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
            visibility_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }

    #[must_use]
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enqueues a message and returns its id.
    pub async fn send(&self, body: &[u8]) -> Result<String, DbError> {
        let message_id: Uuid = sqlx::query_scalar(
            "INSERT INTO queue_messages (queue, body) VALUES ($1, $2) RETURNING message_id",
        )
        .bind(&self.name)
        .bind(body)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(message_id.to_string())
    }

    async fn claim(&self, max_messages: usize) -> Result<Vec<QueueMessage>, DbError> {
        let limit = i64::try_from(max_messages).unwrap_or(i64::MAX);
        let visibility_ms = i64::try_from(self.visibility_timeout.as_millis()).unwrap_or(i64::MAX);

        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE queue_messages
            SET receipt = gen_random_uuid()::text,
                receive_count = receive_count + 1,
                visible_at = now() + ($3 * interval '1 millisecond')
            WHERE id IN (
                SELECT id FROM queue_messages
                WHERE queue = $1 AND visible_at <= now()
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING message_id, receipt, body, receive_count
            "#,
        )
        .bind(&self.name)
        .bind(limit)
        .bind(visibility_ms)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

#[async_trait]
impl MessageQueue for PgQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            let batch = self.claim(max_messages.max(1)).await?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(batch);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE receipt = $1")
            .bind(receipt)
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            debug!(queue = %self.name, receipt, "Receipt no longer current, message was redelivered");
        }
        Ok(())
    }
}
