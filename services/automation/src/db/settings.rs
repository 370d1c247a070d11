//! Per-environment deployment settings.

use async_trait::async_trait;
use sqlx::{postgres::PgPool, postgres::PgRow, Row};

use super::DbError;
use crate::store::{DeploymentSettings, DeploymentSettingsStore};

struct SettingsRow(DeploymentSettings);

impl<'r> sqlx::FromRow<'r, PgRow> for SettingsRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self(DeploymentSettings {
            service: row.try_get("service")?,
            environment: row.try_get("environment")?,
            cpu: row.try_get("cpu")?,
            memory: row.try_get("memory")?,
            instance_count: row.try_get("instance_count")?,
            config_version: row.try_get("config_version")?,
        }))
    }
}

/// Postgres-backed [`DeploymentSettingsStore`].
#[derive(Clone)]
pub struct PgDeploymentSettingsStore {
    pool: PgPool,
}

impl PgDeploymentSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeploymentSettingsStore for PgDeploymentSettingsStore {
    async fn find(
        &self,
        service: &str,
        environment: &str,
    ) -> Result<Option<DeploymentSettings>, DbError> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT service, environment, cpu, memory, instance_count, config_version
            FROM deployment_settings
            WHERE service = $1 AND environment = $2
            "#,
        )
        .bind(service)
        .bind(environment)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(row.map(|r| r.0))
    }

    async fn upsert(&self, settings: &DeploymentSettings) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO deployment_settings (
                service, environment, cpu, memory, instance_count, config_version
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (service, environment) DO UPDATE SET
                cpu = EXCLUDED.cpu,
                memory = EXCLUDED.memory,
                instance_count = EXCLUDED.instance_count,
                config_version = EXCLUDED.config_version
            "#,
        )
        .bind(&settings.service)
        .bind(&settings.environment)
        .bind(settings.cpu)
        .bind(settings.memory)
        .bind(settings.instance_count)
        .bind(&settings.config_version)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(())
    }
}
