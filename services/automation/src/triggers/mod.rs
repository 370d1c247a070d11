//! Trigger decision engines and trigger configuration.
//!
//! - [`AutoDeployEngine`]: a pushed image is deployed to every environment its
//!   service is configured to auto-deploy to
//! - [`TestRunTriggerEngine`]: a completed deployment starts every test suite
//!   configured for its service and environment, once per deployment
//!
//! Production is never an auto-deploy target. [`TriggerConfigService`] strips
//! it from every auto-deploy trigger it writes and the engine skips it again
//! on read.

mod auto_deploy;
mod test_runs;

pub use auto_deploy::AutoDeployEngine;
pub use test_runs::{TestRunTriggerConfig, TestRunTriggerEngine};

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use crate::db::DbError;
use crate::store::{AutoDeploymentTrigger, DeploymentTrigger, TriggerStore};

/// The environment that must never be auto-deployed to.
pub const PRODUCTION_ENVIRONMENT: &str = "prod";

/// Reads and writes trigger configuration.
///
/// Writes replace the stored set wholesale; an empty set deletes the trigger.
#[derive(Clone)]
pub struct TriggerConfigService {
    store: Arc<dyn TriggerStore>,
}

impl TriggerConfigService {
    pub fn new(store: Arc<dyn TriggerStore>) -> Self {
        Self { store }
    }

    /// Stores the auto-deploy environments for `service_name`, minus production.
    ///
    /// Returns the stored trigger, or `None` if nothing is left and the trigger was deleted.
    pub async fn persist_auto_deploy_trigger<I, S>(
        &self,
        service_name: &str,
        environments: I,
    ) -> Result<Option<AutoDeploymentTrigger>, DbError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let environments: BTreeSet<String> = environments
            .into_iter()
            .map(Into::into)
            .filter(|env| env != PRODUCTION_ENVIRONMENT)
            .collect();

        if environments.is_empty() {
            self.store.delete_auto_deploy(service_name).await?;
            info!(service = service_name, "Auto-deploy trigger removed");
            return Ok(None);
        }

        let trigger = AutoDeploymentTrigger {
            service_name: service_name.to_string(),
            environments,
        };
        self.store.replace_auto_deploy(&trigger).await?;
        info!(
            service = service_name,
            environments = ?trigger.environments,
            "Auto-deploy trigger stored"
        );
        Ok(Some(trigger))
    }

    /// Stores the environments `test_suite` runs in after `repository` deploys.
    pub async fn persist_deployment_trigger<I, S>(
        &self,
        repository: &str,
        test_suite: &str,
        environments: I,
    ) -> Result<Option<DeploymentTrigger>, DbError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let environments: BTreeSet<String> = environments.into_iter().map(Into::into).collect();

        if environments.is_empty() {
            self.store
                .delete_deployment_trigger(repository, test_suite)
                .await?;
            info!(repository, test_suite, "Deployment trigger removed");
            return Ok(None);
        }

        let trigger = DeploymentTrigger {
            repository: repository.to_string(),
            test_suite: test_suite.to_string(),
            environments,
        };
        self.store.replace_deployment_trigger(&trigger).await?;
        info!(
            repository,
            test_suite,
            environments = ?trigger.environments,
            "Deployment trigger stored"
        );
        Ok(Some(trigger))
    }

    pub async fn find_auto_deploy_trigger(
        &self,
        service_name: &str,
    ) -> Result<Option<AutoDeploymentTrigger>, DbError> {
        self.store.find_auto_deploy(service_name).await
    }

    pub async fn find_deployment_triggers(
        &self,
        repository: &str,
    ) -> Result<Vec<DeploymentTrigger>, DbError> {
        self.store.find_deployment_triggers(repository).await
    }
}
