//! Database layer for the automation service.
//!
//! This module provides:
//! - Connection pool management
//! - Postgres implementations of the [`crate::store`] traits
//! - The Postgres-backed message queue
//!
//! The database layer uses SQLx with Postgres. Every race-sensitive store
//! operation is a single conditional statement.

mod deployments;
mod error;
mod leases;
mod migration_runs;
mod queue;
mod schedules;
mod settings;
mod test_runs;
mod triggers;

pub use deployments::PgDeploymentStore;
pub use error::DbError;
pub(crate) use error::is_unique_violation;
pub use leases::PgLeaseStore;
pub use migration_runs::PgMigrationStore;
pub use queue::PgQueue;
pub use schedules::PgScheduleStore;
pub use settings::PgDeploymentSettingsStore;
pub use test_runs::PgTestRunStore;
pub use triggers::PgTriggerStore;

use cdp_id::WorkerId;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,

    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/cdp_automation".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl DbConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let database_url = std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_connections);

        let min_connections = std::env::var("DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.min_connections);

        Self {
            database_url,
            max_connections,
            min_connections,
            ..defaults
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Run pending migrations.
    ///
    /// Migrations are loaded at runtime from the first directory that exists.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        info!("Running database migrations");

        let candidates = [
            std::path::PathBuf::from("./migrations"),
            std::path::PathBuf::from("services/automation/migrations"),
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator.run(&self.pool).await.map_err(DbError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(DbError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    pub fn test_run_store(&self) -> PgTestRunStore {
        PgTestRunStore::new(self.pool.clone())
    }

    pub fn migration_store(&self) -> PgMigrationStore {
        PgMigrationStore::new(self.pool.clone())
    }

    pub fn deployment_store(&self) -> PgDeploymentStore {
        PgDeploymentStore::new(self.pool.clone())
    }

    pub fn settings_store(&self) -> PgDeploymentSettingsStore {
        PgDeploymentSettingsStore::new(self.pool.clone())
    }

    pub fn trigger_store(&self) -> PgTriggerStore {
        PgTriggerStore::new(self.pool.clone())
    }

    pub fn schedule_store(&self) -> PgScheduleStore {
        PgScheduleStore::new(self.pool.clone())
    }

    /// Lease store acting for `holder`.
    pub fn lease_store(&self, holder: WorkerId) -> PgLeaseStore {
        PgLeaseStore::new(self.pool.clone(), holder)
    }

    /// Handle on the named queue.
    pub fn queue(&self, name: impl Into<String>) -> PgQueue {
        PgQueue::new(self.pool.clone(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }
}
