//! Database migration run storage.

use async_trait::async_trait;
use cdp_events::UserDetails;
use cdp_id::MigrationId;
use sqlx::{postgres::PgPool, postgres::PgRow, Row};

use super::{is_unique_violation, DbError};
use crate::store::{
    CorrelatedRecord, CorrelationStore, DatabaseMigration, MatchKeys, MigrationStore,
    StatusUpdate, TimeWindow,
};

struct MigrationRow(DatabaseMigration);

impl<'r> sqlx::FromRow<'r, PgRow> for MigrationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let migration_id: String = row.try_get("migration_id")?;
        let migration_id = migration_id
            .parse()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "migration_id".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self(DatabaseMigration {
            migration_id,
            service: row.try_get("service")?,
            environment: row.try_get("environment")?,
            sub_version: row.try_get("sub_version")?,
            user: UserDetails {
                id: row.try_get("user_id")?,
                display_name: row.try_get("user_display_name")?,
            },
            created_at: row.try_get("created_at")?,
            build_id: row.try_get("build_id")?,
            status: row.try_get("status")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

struct LinkedRow(CorrelatedRecord);

impl<'r> sqlx::FromRow<'r, PgRow> for LinkedRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self(CorrelatedRecord {
            id: row.try_get("migration_id")?,
            keys: MatchKeys::new(
                row.try_get::<String, _>("service")?,
                row.try_get::<String, _>("environment")?,
            ),
            created_at: row.try_get("created_at")?,
            external_ref: row.try_get("build_id")?,
            status: row.try_get("status")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

/// Postgres-backed [`MigrationStore`].
#[derive(Clone)]
pub struct PgMigrationStore {
    pool: PgPool,
}

impl PgMigrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CorrelationStore for PgMigrationStore {
    async fn link(
        &self,
        keys: &MatchKeys,
        external_ref: &str,
        window: TimeWindow,
    ) -> Result<Option<CorrelatedRecord>, DbError> {
        let linked = sqlx::query_as::<_, LinkedRow>(
            r#"
            UPDATE database_migrations
            SET build_id = $1, updated_at = now()
            WHERE migration_id = (
                SELECT migration_id FROM database_migrations
                WHERE service = $2
                  AND environment = $3
                  AND build_id IS NULL
                  AND created_at BETWEEN $4 AND $5
                ORDER BY created_at DESC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
              AND build_id IS NULL
            RETURNING migration_id, service, environment, created_at, build_id, status, updated_at
            "#,
        )
        .bind(external_ref)
        .bind(&keys.subject)
        .bind(&keys.environment)
        .bind(window.start)
        .bind(window.end)
        .fetch_optional(&self.pool)
        .await;

        match linked {
            Ok(row) => Ok(row.map(|r| r.0)),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(DbError::Query(e)),
        }
    }

    async fn update_status(
        &self,
        external_ref: &str,
        update: &StatusUpdate,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE database_migrations
            SET status = $2, updated_at = $3
            WHERE build_id = $1
            "#,
        )
        .bind(external_ref)
        .bind(&update.status)
        .bind(update.at)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl MigrationStore for PgMigrationStore {
    async fn create(&self, migration: &DatabaseMigration) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO database_migrations (
                migration_id, service, environment, sub_version, user_id,
                user_display_name, created_at, build_id, status, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(migration.migration_id.to_string())
        .bind(&migration.service)
        .bind(&migration.environment)
        .bind(&migration.sub_version)
        .bind(migration.user.id)
        .bind(&migration.user.display_name)
        .bind(migration.created_at)
        .bind(&migration.build_id)
        .bind(&migration.status)
        .bind(migration.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, format!("migration {}", migration.migration_id)))?;

        Ok(())
    }

    async fn get(&self, migration_id: MigrationId) -> Result<Option<DatabaseMigration>, DbError> {
        let row = sqlx::query_as::<_, MigrationRow>(
            r#"
            SELECT migration_id, service, environment, sub_version, user_id,
                   user_display_name, created_at, build_id, status, updated_at
            FROM database_migrations
            WHERE migration_id = $1
            "#,
        )
        .bind(migration_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(row.map(|r| r.0))
    }
}
