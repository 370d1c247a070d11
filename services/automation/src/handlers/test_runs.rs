//! Test run task state handler.

use std::sync::Arc;

use async_trait::async_trait;
use cdp_events::{event_types, EventEnvelope, TestRunTaskStatePayload};
use tracing::{debug, info, instrument};

use super::{EventHandler, HandlerContext, HandlerResult};
use crate::correlation::{CorrelationOutcome, Correlator};
use crate::store::{MatchKeys, StatusUpdate, TestRunStore};

/// Links ECS task state changes to test runs and records their status.
pub struct TestRunTaskHandler {
    correlator: Correlator<dyn TestRunStore>,
}

impl TestRunTaskHandler {
    pub fn new(correlator: Correlator<dyn TestRunStore>) -> Self {
        Self { correlator }
    }
}

#[async_trait]
impl EventHandler for TestRunTaskHandler {
    fn name(&self) -> &'static str {
        "test_run_task"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[event_types::TEST_RUN_TASK_STATE_CHANGED]
    }

    #[instrument(skip_all, fields(message_id = %ctx.message_id))]
    async fn handle(&self, event: &EventEnvelope, ctx: &HandlerContext) -> HandlerResult<()> {
        let payload: TestRunTaskStatePayload = event.payload_as()?;
        let keys = MatchKeys::new(&payload.test_suite, &payload.environment);
        let update = StatusUpdate {
            status: payload.last_status,
            detail: payload.tests_status,
            at: event.timestamp,
        };

        match self
            .correlator
            .correlate(&keys, &payload.task_arn, &update)
            .await?
        {
            CorrelationOutcome::Linked(run) => info!(
                run_id = %run.id,
                task_arn = %payload.task_arn,
                status = %update.status,
                "Test run task started"
            ),
            CorrelationOutcome::Updated => debug!(
                task_arn = %payload.task_arn,
                status = %update.status,
                "Test run task status updated"
            ),
            CorrelationOutcome::Unmatched => debug!(
                task_arn = %payload.task_arn,
                test_suite = %payload.test_suite,
                environment = %payload.environment,
                "Task state change matches no test run"
            ),
        }

        Ok(())
    }
}
