//! Persisted trigger configuration.
//!
//! Stores only replace or delete whole rows; the environment policy lives in
//! [`crate::triggers::TriggerConfigService`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::DbError;

/// Environments a service is automatically deployed to when a new image is pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoDeploymentTrigger {
    pub service_name: String,
    pub environments: BTreeSet<String>,
}

/// A test suite to run after a deployment of `repository` completes in one of `environments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTrigger {
    pub repository: String,
    pub test_suite: String,
    pub environments: BTreeSet<String>,
}

#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn find_auto_deploy(
        &self,
        service_name: &str,
    ) -> Result<Option<AutoDeploymentTrigger>, DbError>;

    /// Replaces the stored trigger for `trigger.service_name` wholesale.
    async fn replace_auto_deploy(&self, trigger: &AutoDeploymentTrigger) -> Result<(), DbError>;

    async fn delete_auto_deploy(&self, service_name: &str) -> Result<bool, DbError>;

    async fn find_deployment_triggers(
        &self,
        repository: &str,
    ) -> Result<Vec<DeploymentTrigger>, DbError>;

    /// Replaces the stored trigger for `(repository, test_suite)` wholesale.
    async fn replace_deployment_trigger(&self, trigger: &DeploymentTrigger)
        -> Result<(), DbError>;

    async fn delete_deployment_trigger(
        &self,
        repository: &str,
        test_suite: &str,
    ) -> Result<bool, DbError>;
}
