//! Deployment read models used by the trigger engines.

use async_trait::async_trait;
use cdp_events::{DeploymentStatus, UserDetails};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::DbError;

/// Last known state of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub deployment_id: String,
    pub service: String,
    pub environment: String,
    pub version: String,
    pub status: DeploymentStatus,
    /// The user who started the deployment; test runs it triggers are attributed to them.
    pub user: UserDetails,
    pub updated_at: DateTime<Utc>,
}

/// Settings used when auto-deploying a service to an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSettings {
    pub service: String,
    pub environment: String,
    pub cpu: i32,
    pub memory: i32,
    pub instance_count: i32,
    pub config_version: Option<String>,
}

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Inserts or updates a deployment.
    ///
    /// An update older than the stored `updated_at` is ignored so redelivered
    /// events cannot roll the status back. Returns true if the row changed.
    async fn upsert(&self, deployment: &Deployment) -> Result<bool, DbError>;

    async fn get(&self, deployment_id: &str) -> Result<Option<Deployment>, DbError>;
}

#[async_trait]
pub trait DeploymentSettingsStore: Send + Sync {
    async fn find(
        &self,
        service: &str,
        environment: &str,
    ) -> Result<Option<DeploymentSettings>, DbError>;

    async fn upsert(&self, settings: &DeploymentSettings) -> Result<(), DbError>;
}
