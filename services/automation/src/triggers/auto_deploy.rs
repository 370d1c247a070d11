//! Image pushed -> auto-deploy.

use std::sync::Arc;

use async_trait::async_trait;
use cdp_events::{event_types, EventEnvelope, ImagePushedPayload, UserDetails};
use tracing::{debug, error, info, instrument, warn};

use super::PRODUCTION_ENVIRONMENT;
use crate::handlers::{EventHandler, HandlerContext, HandlerError, HandlerResult};
use crate::ops::{AutoDeployRequest, SelfServiceOps};
use crate::store::{DeploymentSettingsStore, TriggerStore};

/// Deploys a pushed image to every environment its service auto-deploys to.
///
/// Environments are independent: a missing setting or a failed call is logged
/// and the remaining environments still deploy. Failed calls are summarized in
/// a [`HandlerError::Partial`].
pub struct AutoDeployEngine {
    triggers: Arc<dyn TriggerStore>,
    settings: Arc<dyn DeploymentSettingsStore>,
    ops: Arc<dyn SelfServiceOps>,
}

impl AutoDeployEngine {
    pub fn new(
        triggers: Arc<dyn TriggerStore>,
        settings: Arc<dyn DeploymentSettingsStore>,
        ops: Arc<dyn SelfServiceOps>,
    ) -> Self {
        Self {
            triggers,
            settings,
            ops,
        }
    }

    /// Returns true if the call was made and succeeded; false if skipped.
    async fn deploy_to(
        &self,
        image: &ImagePushedPayload,
        environment: &str,
    ) -> Result<bool, HandlerError> {
        let settings = match self.settings.find(&image.repository, environment).await {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                warn!(
                    service = %image.repository,
                    environment,
                    "No deployment settings, skipping auto-deploy"
                );
                return Ok(false);
            }
            Err(e) => {
                error!(
                    service = %image.repository,
                    environment,
                    error = %e,
                    "Failed to load deployment settings, skipping auto-deploy"
                );
                return Ok(false);
            }
        };

        let request = AutoDeployRequest {
            image_name: image.repository.clone(),
            version: image.tag.clone(),
            environment: environment.to_string(),
            user: UserDetails::system(),
            cpu: settings.cpu,
            memory: settings.memory,
            instance_count: settings.instance_count,
            config_version: settings.config_version,
        };
        self.ops.auto_deploy_service(&request).await?;

        info!(
            service = %image.repository,
            version = %image.tag,
            environment,
            "Auto-deploy requested"
        );
        Ok(true)
    }
}

#[async_trait]
impl EventHandler for AutoDeployEngine {
    fn name(&self) -> &'static str {
        "auto_deploy"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[event_types::IMAGE_PUSHED]
    }

    #[instrument(skip_all, fields(message_id = %ctx.message_id))]
    async fn handle(&self, event: &EventEnvelope, ctx: &HandlerContext) -> HandlerResult<()> {
        let image: ImagePushedPayload = event.payload_as()?;

        let trigger = match self.triggers.find_auto_deploy(&image.repository).await {
            Ok(Some(trigger)) => trigger,
            Ok(None) => {
                debug!(service = %image.repository, "No auto-deploy trigger");
                return Ok(());
            }
            Err(e) => {
                error!(
                    service = %image.repository,
                    error = %e,
                    "Failed to load auto-deploy trigger"
                );
                return Ok(());
            }
        };

        let environments: Vec<&str> = trigger
            .environments
            .iter()
            .map(String::as_str)
            .filter(|env| *env != PRODUCTION_ENVIRONMENT)
            .collect();

        let mut failed = 0;
        for environment in &environments {
            if let Err(e) = self.deploy_to(&image, environment).await {
                error!(
                    service = %image.repository,
                    environment,
                    error = %e,
                    "Auto-deploy failed"
                );
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(HandlerError::Partial {
                failed,
                total: environments.len(),
            });
        }
        Ok(())
    }
}
