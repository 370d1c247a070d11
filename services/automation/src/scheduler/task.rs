//! Scheduled tasks and their execution.

use std::sync::Arc;

use cdp_events::UserDetails;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::db::DbError;
use crate::ops::{OpsError, SelfServiceOps, TriggerTestSuiteRequest};
use crate::store::{Schedule, TestRun, TestRunStore};

/// Deploys a test suite image as a one-off run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSuiteDeployTask {
    /// The test suite to run.
    pub entity_id: String,
    pub environment: String,
    pub cpu: i32,
    pub memory: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// What a schedule does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleTask {
    TestSuiteDeploy(TestSuiteDeployTask),
}

impl ScheduleTask {
    /// The entity the task acts on; schedules are listed per entity.
    pub fn entity_id(&self) -> &str {
        match self {
            ScheduleTask::TestSuiteDeploy(task) => &task.entity_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("ops API error: {0}")]
    Ops(#[from] OpsError),
}

/// Runs the task of a due schedule.
pub struct TaskExecutor {
    ops: Arc<dyn SelfServiceOps>,
    test_runs: Arc<dyn TestRunStore>,
}

impl TaskExecutor {
    pub fn new(ops: Arc<dyn SelfServiceOps>, test_runs: Arc<dyn TestRunStore>) -> Self {
        Self { ops, test_runs }
    }

    /// Runs the schedule's task. Records are stamped when the task starts,
    /// not with the time of the pass that found the schedule due.
    pub async fn execute(&self, schedule: &Schedule) -> Result<(), TaskError> {
        match &schedule.task {
            ScheduleTask::TestSuiteDeploy(task) => {
                self.deploy_test_suite(task, &schedule.owner).await
            }
        }
    }

    /// Records a test run for the task to link to, then starts the suite.
    async fn deploy_test_suite(
        &self,
        task: &TestSuiteDeployTask,
        owner: &UserDetails,
    ) -> Result<(), TaskError> {
        let run = TestRun::starting(
            &task.entity_id,
            &task.environment,
            None,
            owner.clone(),
            Utc::now(),
        );
        self.test_runs.create(&run).await?;

        let request = TriggerTestSuiteRequest {
            image_name: task.entity_id.clone(),
            environment: task.environment.clone(),
            cpu: task.cpu,
            memory: task.memory,
            user: owner.clone(),
            profile: task.profile.clone(),
        };

        if let Err(e) = self.ops.trigger_test_suite(&request).await {
            if let Err(delete_err) = self.test_runs.delete(run.run_id).await {
                error!(
                    run_id = %run.run_id,
                    error = %delete_err,
                    "Failed to remove test run after failed trigger"
                );
            }
            return Err(e.into());
        }

        info!(
            test_suite = %task.entity_id,
            environment = %task.environment,
            run_id = %run.run_id,
            "Scheduled test suite started"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_serializes_with_type_tag() {
        let task = ScheduleTask::TestSuiteDeploy(TestSuiteDeployTask {
            entity_id: "smoke".into(),
            environment: "dev".into(),
            cpu: 1024,
            memory: 2048,
            profile: None,
        });

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "test_suite_deploy");
        assert_eq!(json["entity_id"], "smoke");

        let back: ScheduleTask = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
        assert_eq!(back.entity_id(), "smoke");
    }
}
