//! Trigger configuration storage.

use async_trait::async_trait;
use sqlx::{postgres::PgPool, postgres::PgRow, Row};

use super::DbError;
use crate::store::{AutoDeploymentTrigger, DeploymentTrigger, TriggerStore};

struct AutoDeployRow(AutoDeploymentTrigger);

impl<'r> sqlx::FromRow<'r, PgRow> for AutoDeployRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let environments: Vec<String> = row.try_get("environments")?;
        Ok(Self(AutoDeploymentTrigger {
            service_name: row.try_get("service_name")?,
            environments: environments.into_iter().collect(),
        }))
    }
}

struct DeploymentTriggerRow(DeploymentTrigger);

impl<'r> sqlx::FromRow<'r, PgRow> for DeploymentTriggerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let environments: Vec<String> = row.try_get("environments")?;
        Ok(Self(DeploymentTrigger {
            repository: row.try_get("repository")?,
            test_suite: row.try_get("test_suite")?,
            environments: environments.into_iter().collect(),
        }))
    }
}

/// Postgres-backed [`TriggerStore`].
#[derive(Clone)]
pub struct PgTriggerStore {
    pool: PgPool,
}

impl PgTriggerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerStore for PgTriggerStore {
    async fn find_auto_deploy(
        &self,
        service_name: &str,
    ) -> Result<Option<AutoDeploymentTrigger>, DbError> {
        let row = sqlx::query_as::<_, AutoDeployRow>(
            "SELECT service_name, environments FROM auto_deployment_triggers WHERE service_name = $1",
        )
        .bind(service_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(row.map(|r| r.0))
    }

    async fn replace_auto_deploy(&self, trigger: &AutoDeploymentTrigger) -> Result<(), DbError> {
        let environments: Vec<String> = trigger.environments.iter().cloned().collect();
        sqlx::query(
            r#"
            INSERT INTO auto_deployment_triggers (service_name, environments)
            VALUES ($1, $2)
            ON CONFLICT (service_name) DO UPDATE SET environments = EXCLUDED.environments
            "#,
        )
        .bind(&trigger.service_name)
        .bind(environments)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(())
    }

    async fn delete_auto_deploy(&self, service_name: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM auto_deployment_triggers WHERE service_name = $1")
            .bind(service_name)
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_deployment_triggers(
        &self,
        repository: &str,
    ) -> Result<Vec<DeploymentTrigger>, DbError> {
        let rows = sqlx::query_as::<_, DeploymentTriggerRow>(
            r#"
            SELECT repository, test_suite, environments
            FROM deployment_triggers
            WHERE repository = $1
            ORDER BY test_suite
            "#,
        )
        .bind(repository)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn replace_deployment_trigger(
        &self,
        trigger: &DeploymentTrigger,
    ) -> Result<(), DbError> {
        let environments: Vec<String> = trigger.environments.iter().cloned().collect();
        sqlx::query(
            r#"
            INSERT INTO deployment_triggers (repository, test_suite, environments)
            VALUES ($1, $2, $3)
            ON CONFLICT (repository, test_suite) DO UPDATE SET environments = EXCLUDED.environments
            "#,
        )
        .bind(&trigger.repository)
        .bind(&trigger.test_suite)
        .bind(environments)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(())
    }

    async fn delete_deployment_trigger(
        &self,
        repository: &str,
        test_suite: &str,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "DELETE FROM deployment_triggers WHERE repository = $1 AND test_suite = $2",
        )
        .bind(repository)
        .bind(test_suite)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }
}
