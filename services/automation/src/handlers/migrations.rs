//! Migration build state handler.

use async_trait::async_trait;
use cdp_events::{event_types, EventEnvelope, MigrationBuildStatePayload};
use tracing::{debug, info, instrument};

use super::{EventHandler, HandlerContext, HandlerResult};
use crate::correlation::{CorrelationOutcome, Correlator};
use crate::store::{MatchKeys, MigrationStore, StatusUpdate};

/// Links CodeBuild state changes to database migrations and records their status.
pub struct MigrationBuildHandler {
    correlator: Correlator<dyn MigrationStore>,
}

impl MigrationBuildHandler {
    pub fn new(correlator: Correlator<dyn MigrationStore>) -> Self {
        Self { correlator }
    }
}

#[async_trait]
impl EventHandler for MigrationBuildHandler {
    fn name(&self) -> &'static str {
        "migration_build"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[event_types::MIGRATION_BUILD_STATE_CHANGED]
    }

    #[instrument(skip_all, fields(message_id = %ctx.message_id))]
    async fn handle(&self, event: &EventEnvelope, ctx: &HandlerContext) -> HandlerResult<()> {
        let payload: MigrationBuildStatePayload = event.payload_as()?;
        let keys = MatchKeys::new(&payload.service, &payload.environment);
        let update = StatusUpdate {
            status: payload.build_status,
            detail: None,
            at: event.timestamp,
        };

        match self
            .correlator
            .correlate(&keys, &payload.build_id, &update)
            .await?
        {
            CorrelationOutcome::Linked(migration) => info!(
                migration_id = %migration.id,
                build_id = %payload.build_id,
                status = %update.status,
                "Migration build started"
            ),
            CorrelationOutcome::Updated => debug!(
                build_id = %payload.build_id,
                status = %update.status,
                "Migration build status updated"
            ),
            CorrelationOutcome::Unmatched => debug!(
                build_id = %payload.build_id,
                service = %payload.service,
                environment = %payload.environment,
                "Build state change matches no migration"
            ),
        }

        Ok(())
    }
}
