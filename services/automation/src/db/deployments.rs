//! Deployment read model storage.

use async_trait::async_trait;
use cdp_events::UserDetails;
use sqlx::{postgres::PgPool, postgres::PgRow, Row};

use super::DbError;
use crate::store::{Deployment, DeploymentStore};

struct DeploymentRow(Deployment);

impl<'r> sqlx::FromRow<'r, PgRow> for DeploymentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = status.parse().map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self(Deployment {
            deployment_id: row.try_get("deployment_id")?,
            service: row.try_get("service")?,
            environment: row.try_get("environment")?,
            version: row.try_get("version")?,
            status,
            user: UserDetails {
                id: row.try_get("user_id")?,
                display_name: row.try_get("user_display_name")?,
            },
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

/// Postgres-backed [`DeploymentStore`].
#[derive(Clone)]
pub struct PgDeploymentStore {
    pool: PgPool,
}

impl PgDeploymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeploymentStore for PgDeploymentStore {
    async fn upsert(&self, deployment: &Deployment) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO deployments (
                deployment_id, service, environment, version, status,
                user_id, user_display_name, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (deployment_id) DO UPDATE SET
                service = EXCLUDED.service,
                environment = EXCLUDED.environment,
                version = EXCLUDED.version,
                status = EXCLUDED.status,
                user_id = EXCLUDED.user_id,
                user_display_name = EXCLUDED.user_display_name,
                updated_at = EXCLUDED.updated_at
            WHERE deployments.updated_at <= EXCLUDED.updated_at
            "#,
        )
        .bind(&deployment.deployment_id)
        .bind(&deployment.service)
        .bind(&deployment.environment)
        .bind(&deployment.version)
        .bind(deployment.status.as_str())
        .bind(deployment.user.id)
        .bind(&deployment.user.display_name)
        .bind(deployment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, deployment_id: &str) -> Result<Option<Deployment>, DbError> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            SELECT deployment_id, service, environment, version, status,
                   user_id, user_display_name, updated_at
            FROM deployments
            WHERE deployment_id = $1
            "#,
        )
        .bind(deployment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(row.map(|r| r.0))
    }
}
