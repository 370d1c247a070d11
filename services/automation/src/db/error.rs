//! Database error types.

use thiserror::Error;

/// Storage operation errors.
///
/// Shared by the Postgres stores and their in-memory counterparts so callers
/// handle one error type regardless of backend.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/automation.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A record with the same unique key already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored value could not be decoded into its domain type.
    #[error("invalid stored value: {0}")]
    Decode(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    /// Maps a unique-violation into [`DbError::Conflict`], everything else into [`DbError::Query`].
    pub(crate) fn from_insert(err: sqlx::Error, what: impl Into<String>) -> Self {
        if is_unique_violation(&err) {
            return DbError::Conflict(what.into());
        }
        DbError::Query(err)
    }
}

/// Returns true if the error is a Postgres unique violation (SQLSTATE 23505).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}
