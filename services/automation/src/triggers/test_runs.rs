//! Deployment completed -> test suite runs.

use std::sync::Arc;

use async_trait::async_trait;
use cdp_events::{
    event_types, DeploymentEventStatus, DeploymentStatus, DeploymentStatusChangedPayload,
    EventEnvelope,
};
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::handlers::{EventHandler, HandlerContext, HandlerError, HandlerResult};
use crate::ops::{OpsError, SelfServiceOps, TriggerTestSuiteRequest};
use crate::store::{Deployment, DeploymentStore, TestRun, TestRunStore, TriggerStore};

/// Resources requested for deployment-triggered test runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestRunTriggerConfig {
    pub cpu: i32,
    pub memory: i32,
}

impl Default for TestRunTriggerConfig {
    fn default() -> Self {
        Self {
            cpu: 4096,
            memory: 8192,
        }
    }
}

/// Starts the configured test suites when a deployment completes.
///
/// Each `(test_suite, environment, deployment)` runs at most once: the test
/// run is claimed in storage before the API is called, so a redelivered event
/// finds the claim and skips. A claim whose API call fails is removed again.
pub struct TestRunTriggerEngine {
    deployments: Arc<dyn DeploymentStore>,
    triggers: Arc<dyn TriggerStore>,
    test_runs: Arc<dyn TestRunStore>,
    ops: Arc<dyn SelfServiceOps>,
    config: TestRunTriggerConfig,
}

impl TestRunTriggerEngine {
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        triggers: Arc<dyn TriggerStore>,
        test_runs: Arc<dyn TestRunStore>,
        ops: Arc<dyn SelfServiceOps>,
        config: TestRunTriggerConfig,
    ) -> Self {
        Self {
            deployments,
            triggers,
            test_runs,
            ops,
            config,
        }
    }

    /// Claims and starts one test suite. Returns false if it already ran.
    async fn start_suite(
        &self,
        deployment: &Deployment,
        test_suite: &str,
    ) -> Result<bool, HandlerError> {
        let run = TestRun::starting(
            test_suite,
            &deployment.environment,
            Some(deployment.deployment_id.clone()),
            deployment.user.clone(),
            Utc::now(),
        );

        if !self.test_runs.create_for_deployment(&run).await? {
            debug!(
                test_suite,
                deployment_id = %deployment.deployment_id,
                "Test suite already triggered for deployment"
            );
            return Ok(false);
        }

        let request = TriggerTestSuiteRequest {
            image_name: test_suite.to_string(),
            environment: deployment.environment.clone(),
            cpu: self.config.cpu,
            memory: self.config.memory,
            user: deployment.user.clone(),
            profile: None,
        };

        match self.ops.trigger_test_suite(&request).await {
            Ok(remote_run_id) => {
                info!(
                    test_suite,
                    environment = %deployment.environment,
                    deployment_id = %deployment.deployment_id,
                    run_id = %run.run_id,
                    remote_run_id = ?remote_run_id,
                    "Test suite triggered"
                );
                Ok(true)
            }
            Err(e) => {
                self.release_claim(&run).await;
                Err(e.into())
            }
        }
    }

    async fn release_claim(&self, run: &TestRun) {
        if let Err(e) = self.test_runs.delete(run.run_id).await {
            error!(
                run_id = %run.run_id,
                error = %e,
                "Failed to remove test run after failed trigger"
            );
        }
    }
}

#[async_trait]
impl EventHandler for TestRunTriggerEngine {
    fn name(&self) -> &'static str {
        "test_run_trigger"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[event_types::DEPLOYMENT_STATUS_CHANGED]
    }

    #[instrument(skip_all, fields(message_id = %ctx.message_id))]
    async fn handle(&self, event: &EventEnvelope, ctx: &HandlerContext) -> HandlerResult<()> {
        let payload: DeploymentStatusChangedPayload = event.payload_as()?;

        if payload.status != DeploymentEventStatus::DeploymentCompleted {
            debug!(
                deployment_id = %payload.deployment_id,
                status = ?payload.status,
                "Deployment not completed, nothing to trigger"
            );
            return Ok(());
        }

        let Some(deployment) = self.deployments.get(&payload.deployment_id).await? else {
            warn!(deployment_id = %payload.deployment_id, "Unknown deployment");
            return Ok(());
        };

        if deployment.status != DeploymentStatus::Running {
            debug!(
                deployment_id = %deployment.deployment_id,
                status = %deployment.status,
                "Deployment not running, nothing to trigger"
            );
            return Ok(());
        }

        let triggers = match self.triggers.find_deployment_triggers(&deployment.service).await {
            Ok(triggers) => triggers,
            Err(e) => {
                error!(
                    service = %deployment.service,
                    error = %e,
                    "Failed to load deployment triggers"
                );
                return Ok(());
            }
        };

        let suites: Vec<&str> = triggers
            .iter()
            .filter(|t| t.environments.contains(&deployment.environment))
            .map(|t| t.test_suite.as_str())
            .collect();

        let mut first_error: Option<OpsError> = None;
        let mut failed = 0;
        for test_suite in &suites {
            match self.start_suite(&deployment, test_suite).await {
                Ok(_) => {}
                Err(HandlerError::Ops(e)) => {
                    error!(test_suite, error = %e, "Failed to trigger test suite");
                    failed += 1;
                    first_error.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        match (failed, first_error) {
            (0, _) => Ok(()),
            (1, Some(e)) => Err(e.into()),
            _ => Err(HandlerError::Partial {
                failed,
                total: suites.len(),
            }),
        }
    }
}
