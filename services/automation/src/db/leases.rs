//! Lease storage.

use std::time::Duration;

use async_trait::async_trait;
use cdp_id::WorkerId;
use sqlx::postgres::PgPool;

use super::DbError;
use crate::store::LeaseStore;

/// Postgres-backed [`LeaseStore`] acting for one holder.
#[derive(Clone)]
pub struct PgLeaseStore {
    pool: PgPool,
    holder: WorkerId,
}

impl PgLeaseStore {
    pub fn new(pool: PgPool, holder: WorkerId) -> Self {
        Self { pool, holder }
    }

    pub fn holder(&self) -> WorkerId {
        self.holder
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, DbError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        // Takes a free key, refreshes our own lease, or steals an expired one.
        let result = sqlx::query(
            r#"
            INSERT INTO schedule_leases (key, holder, expires_at)
            VALUES ($1, $2, now() + ($3 * interval '1 millisecond'))
            ON CONFLICT (key) DO UPDATE SET
                holder = EXCLUDED.holder,
                expires_at = EXCLUDED.expires_at
            WHERE schedule_leases.holder = EXCLUDED.holder
               OR schedule_leases.expires_at <= now()
            "#,
        )
        .bind(key)
        .bind(self.holder.to_string())
        .bind(ttl_ms)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM schedule_leases WHERE key = $1 AND holder = $2")
            .bind(key)
            .bind(self.holder.to_string())
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(())
    }
}
