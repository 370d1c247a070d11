//! Test run storage.

use async_trait::async_trait;
use cdp_events::UserDetails;
use cdp_id::TestRunId;
use sqlx::{postgres::PgPool, postgres::PgRow, Row};

use super::{is_unique_violation, DbError};
use crate::store::{
    CorrelatedRecord, CorrelationStore, MatchKeys, StatusUpdate, TestRun, TestRunStore,
    TimeWindow,
};

const TEST_RUN_COLUMNS: &str = r#"
    run_id, test_suite, environment, deployment_id, user_id, user_display_name,
    created_at, task_arn, task_status, tests_status, updated_at
"#;

struct TestRunRow(TestRun);

impl<'r> sqlx::FromRow<'r, PgRow> for TestRunRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let run_id: String = row.try_get("run_id")?;
        let run_id = run_id.parse().map_err(|e| sqlx::Error::ColumnDecode {
            index: "run_id".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self(TestRun {
            run_id,
            test_suite: row.try_get("test_suite")?,
            environment: row.try_get("environment")?,
            deployment_id: row.try_get("deployment_id")?,
            user: UserDetails {
                id: row.try_get("user_id")?,
                display_name: row.try_get("user_display_name")?,
            },
            created_at: row.try_get("created_at")?,
            task_arn: row.try_get("task_arn")?,
            task_status: row.try_get("task_status")?,
            tests_status: row.try_get("tests_status")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

struct LinkedRow(CorrelatedRecord);

impl<'r> sqlx::FromRow<'r, PgRow> for LinkedRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self(CorrelatedRecord {
            id: row.try_get("run_id")?,
            keys: MatchKeys::new(
                row.try_get::<String, _>("test_suite")?,
                row.try_get::<String, _>("environment")?,
            ),
            created_at: row.try_get("created_at")?,
            external_ref: row.try_get("task_arn")?,
            status: row.try_get("task_status")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

/// Postgres-backed [`TestRunStore`].
#[derive(Clone)]
pub struct PgTestRunStore {
    pool: PgPool,
}

impl PgTestRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a run. With `dedup` set, an existing run for the same
    /// deployment makes this a no-op returning false.
    async fn insert(&self, run: &TestRun, dedup: bool) -> Result<bool, DbError> {
        let conflict = if dedup {
            "ON CONFLICT (test_suite, environment, deployment_id) WHERE deployment_id IS NOT NULL DO NOTHING"
        } else {
            ""
        };
        let sql = format!(
            r#"
            INSERT INTO test_runs ({TEST_RUN_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            {conflict}
            "#
        );

        let result = sqlx::query(&sql)
            .bind(run.run_id.to_string())
            .bind(&run.test_suite)
            .bind(&run.environment)
            .bind(&run.deployment_id)
            .bind(run.user.id)
            .bind(&run.user.display_name)
            .bind(run.created_at)
            .bind(&run.task_arn)
            .bind(&run.task_status)
            .bind(&run.tests_status)
            .bind(run.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::from_insert(e, format!("test run {}", run.run_id)))?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl CorrelationStore for PgTestRunStore {
    async fn link(
        &self,
        keys: &MatchKeys,
        external_ref: &str,
        window: TimeWindow,
    ) -> Result<Option<CorrelatedRecord>, DbError> {
        let linked = sqlx::query_as::<_, LinkedRow>(
            r#"
            UPDATE test_runs
            SET task_arn = $1, updated_at = now()
            WHERE run_id = (
                SELECT run_id FROM test_runs
                WHERE test_suite = $2
                  AND environment = $3
                  AND task_arn IS NULL
                  AND created_at BETWEEN $4 AND $5
                ORDER BY created_at DESC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
              AND task_arn IS NULL
            RETURNING run_id, test_suite, environment, created_at, task_arn, task_status, updated_at
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
            // The reference is already linked to another run.
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
            UPDATE test_runs
            SET task_status = $2,
                tests_status = COALESCE($3, tests_status),
                updated_at = $4
            WHERE task_arn = $1
            "#,
        )
        .bind(external_ref)
        .bind(&update.status)
        .bind(&update.detail)
        .bind(update.at)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TestRunStore for PgTestRunStore {
    async fn create(&self, run: &TestRun) -> Result<(), DbError> {
        self.insert(run, false).await.map(|_| ())
    }

    async fn create_for_deployment(&self, run: &TestRun) -> Result<bool, DbError> {
        self.insert(run, true).await
    }

    async fn get(&self, run_id: TestRunId) -> Result<Option<TestRun>, DbError> {
        let sql = format!("SELECT {TEST_RUN_COLUMNS} FROM test_runs WHERE run_id = $1");
        let row = sqlx::query_as::<_, TestRunRow>(&sql)
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(row.map(|r| r.0))
    }

    async fn delete(&self, run_id: TestRunId) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM test_runs WHERE run_id = $1")
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(result.rows_affected() > 0)
    }
}
