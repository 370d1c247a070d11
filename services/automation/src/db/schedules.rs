//! Schedule storage.
//!
//! Recurrence, task and owner are stored as JSONB; `entity_id` is denormalized
//! from the task so schedules can be listed per entity.

use async_trait::async_trait;
use cdp_id::ScheduleId;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPool, postgres::PgRow, types::Json, Row};

use super::DbError;
use crate::store::{Schedule, ScheduleStore};

const SCHEDULE_COLUMNS: &str = r#"
    id, enabled, config, cron_expression, task, owner,
    created_at, updated_at, next_run_at, start_date, end_date
"#;

struct ScheduleRow(Schedule);

impl<'r> sqlx::FromRow<'r, PgRow> for ScheduleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let id = id.parse().map_err(|e| sqlx::Error::ColumnDecode {
            index: "id".to_string(),
            source: Box::new(e),
        })?;
        let Json(config) = row.try_get("config")?;
        let Json(task) = row.try_get("task")?;
        let Json(owner) = row.try_get("owner")?;

        Ok(Self(Schedule {
            id,
            enabled: row.try_get("enabled")?,
            config,
            cron_expression: row.try_get("cron_expression")?,
            task,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            next_run_at: row.try_get("next_run_at")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            owner,
        }))
    }
}

/// Postgres-backed [`ScheduleStore`].
#[derive(Clone)]
pub struct PgScheduleStore {
    pool: PgPool,
}

impl PgScheduleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleStore for PgScheduleStore {
    async fn insert(&self, schedule: &Schedule) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO schedules (
                id, enabled, config, cron_expression, task, entity_id, owner,
                created_at, updated_at, next_run_at, start_date, end_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(schedule.id.to_string())
        .bind(schedule.enabled)
        .bind(Json(&schedule.config))
        .bind(&schedule.cron_expression)
        .bind(Json(&schedule.task))
        .bind(schedule.task.entity_id())
        .bind(Json(&schedule.owner))
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .bind(schedule.next_run_at)
        .bind(schedule.start_date)
        .bind(schedule.end_date)
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, format!("schedule {}", schedule.id)))?;

        Ok(())
    }

    async fn get(&self, id: ScheduleId) -> Result<Option<Schedule>, DbError> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1");
        let row = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(row.map(|r| r.0))
    }

    async fn replace(&self, schedule: &Schedule) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE schedules SET
                enabled = $2,
                config = $3,
                cron_expression = $4,
                task = $5,
                entity_id = $6,
                owner = $7,
                updated_at = $8,
                next_run_at = $9,
                start_date = $10,
                end_date = $11
            WHERE id = $1
            "#,
        )
        .bind(schedule.id.to_string())
        .bind(schedule.enabled)
        .bind(Json(&schedule.config))
        .bind(&schedule.cron_expression)
        .bind(Json(&schedule.task))
        .bind(schedule.task.entity_id())
        .bind(Json(&schedule.owner))
        .bind(schedule.updated_at)
        .bind(schedule.next_run_at)
        .bind(schedule.start_date)
        .bind(schedule.end_date)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: ScheduleId) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_entity(&self, entity_id: &str) -> Result<Vec<Schedule>, DbError> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE entity_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>, DbError> {
        let sql = format!(
            r#"
            SELECT {SCHEDULE_COLUMNS} FROM schedules
            WHERE enabled AND next_run_at IS NOT NULL AND next_run_at <= $1
            ORDER BY next_run_at
            "#
        );
        let rows = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn advance_next_run(
        &self,
        id: ScheduleId,
        expected: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE schedules
            SET next_run_at = $3, updated_at = $4
            WHERE id = $1 AND next_run_at IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(id.to_string())
        .bind(expected)
        .bind(next)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }
}
