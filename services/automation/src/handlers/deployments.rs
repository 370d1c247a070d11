//! Deployment read model handler.

use std::sync::Arc;

use async_trait::async_trait;
use cdp_events::{event_types, DeploymentLifecyclePayload, EventEnvelope};
use tracing::{debug, instrument};

use super::{EventHandler, HandlerContext, HandlerResult};
use crate::store::{Deployment, DeploymentStore};

/// Keeps the deployment read model current from lifecycle events.
///
/// The envelope timestamp is the row's `updated_at`, so an out-of-order
/// redelivery never rolls a deployment back to an older status.
pub struct DeploymentLifecycleHandler {
    store: Arc<dyn DeploymentStore>,
}

impl DeploymentLifecycleHandler {
    pub fn new(store: Arc<dyn DeploymentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for DeploymentLifecycleHandler {
    fn name(&self) -> &'static str {
        "deployment_lifecycle"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[event_types::DEPLOYMENT_LIFECYCLE_CHANGED]
    }

    #[instrument(skip_all, fields(message_id = %ctx.message_id))]
    async fn handle(&self, event: &EventEnvelope, ctx: &HandlerContext) -> HandlerResult<()> {
        let payload: DeploymentLifecyclePayload = event.payload_as()?;

        let deployment = Deployment {
            deployment_id: payload.deployment_id,
            service: payload.service,
            environment: payload.environment,
            version: payload.version,
            status: payload.status,
            user: payload.user,
            updated_at: event.timestamp,
        };

        let changed = self.store.upsert(&deployment).await?;
        debug!(
            message_id = %ctx.message_id,
            deployment_id = %deployment.deployment_id,
            status = %deployment.status,
            changed,
            "Deployment lifecycle recorded"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryDeploymentStore;
    use cdp_events::{DeploymentStatus, UserDetails};
    use chrono::{Duration, Utc};

    fn ctx() -> HandlerContext {
        HandlerContext {
            message_id: "m-1".into(),
            queue: "deployment-events".into(),
            receive_count: 1,
        }
    }

    fn event(status: DeploymentStatus, at: chrono::DateTime<Utc>) -> EventEnvelope {
        EventEnvelope::from_payload(
            event_types::DEPLOYMENT_LIFECYCLE_CHANGED,
            at,
            &DeploymentLifecyclePayload {
                deployment_id: "dep-1".into(),
                service: "foo".into(),
                environment: "dev".into(),
                version: "1.0.0".into(),
                status,
                user: UserDetails::system(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_out_of_order_event_does_not_roll_back() {
        let store = Arc::new(MemoryDeploymentStore::new());
        let handler = DeploymentLifecycleHandler::new(store.clone());
        let now = Utc::now();

        handler
            .handle(&event(DeploymentStatus::Running, now), &ctx())
            .await
            .unwrap();
        handler
            .handle(
                &event(DeploymentStatus::Pending, now - Duration::seconds(30)),
                &ctx(),
            )
            .await
            .unwrap();

        let stored = store.get("dep-1").await.unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Running);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_decode_error() {
        let handler = DeploymentLifecycleHandler::new(Arc::new(MemoryDeploymentStore::new()));
        let event = EventEnvelope::new(
            event_types::DEPLOYMENT_LIFECYCLE_CHANGED,
            Utc::now(),
            serde_json::json!({"deployment_id": "dep-1"}),
        );

        let err = handler.handle(&event, &ctx()).await.unwrap_err();
        assert!(matches!(err, super::super::HandlerError::Decode(_)));
    }
}
