//! Event type definitions for all inbound infrastructure events.
//!
//! Each event type has a corresponding payload struct with the event-specific data.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Event Type Constants
// =============================================================================

/// All event type names as constants.
pub mod event_types {
    // Deployment
    pub const DEPLOYMENT_LIFECYCLE_CHANGED: &str = "deployment.lifecycle_changed";
    pub const DEPLOYMENT_STATUS_CHANGED: &str = "deployment.status_changed";

    // Image registry
    pub const IMAGE_PUSHED: &str = "image.pushed";

    // Test run tasks
    pub const TEST_RUN_TASK_STATE_CHANGED: &str = "test_run.task_state_changed";

    // Database migration builds
    pub const MIGRATION_BUILD_STATE_CHANGED: &str = "migration.build_state_changed";
}

// =============================================================================
// Shared Types
// =============================================================================

/// The user an action is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetails {
    pub id: Uuid,
    pub display_name: String,
}

impl UserDetails {
    /// Display name of the sentinel identity used for automated actions.
    pub const SYSTEM_DISPLAY_NAME: &'static str = "Self-Service Ops";

    /// The synthetic system user (nil UUID) that automated actions run as.
    pub fn system() -> Self {
        Self {
            id: Uuid::nil(),
            display_name: Self::SYSTEM_DISPLAY_NAME.to_string(),
        }
    }

    /// Returns true if this is the system sentinel user.
    pub fn is_system(&self) -> bool {
        self.id.is_nil()
    }
}

/// Persisted lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Undeployed,
    Failed,
}

impl DeploymentStatus {
    /// The storage representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Undeployed => "undeployed",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = crate::EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "running" => Ok(DeploymentStatus::Running),
            "undeployed" => Ok(DeploymentStatus::Undeployed),
            "failed" => Ok(DeploymentStatus::Failed),
            other => Err(crate::EventError::InvalidPayload(format!(
                "unknown deployment status: {other}"
            ))),
        }
    }
}

/// Status reported by the orchestrator's deployment state-change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentEventStatus {
    DeploymentInProgress,
    DeploymentCompleted,
    DeploymentFailed,
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Payloads
// =============================================================================

/// Payload for deployment.lifecycle_changed.
///
/// Emitted by the deployment service whenever a deployment record changes
/// status; the automation service keeps a read model of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentLifecyclePayload {
    pub deployment_id: String,
    pub service: String,
    pub environment: String,
    pub version: String,
    pub status: DeploymentStatus,
    pub user: UserDetails,
}

/// Payload for deployment.status_changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatusChangedPayload {
    pub deployment_id: String,
    pub status: DeploymentEventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload for image.pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePushedPayload {
    pub repository: String,
    pub tag: String,
}

/// Payload for test_run.task_state_changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunTaskStatePayload {
    pub task_arn: String,
    pub test_suite: String,
    pub environment: String,
    pub last_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_status: Option<String>,
}

/// Payload for migration.build_state_changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationBuildStatePayload {
    pub build_id: String,
    pub service: String,
    pub environment: String,
    pub build_status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_user_is_nil_sentinel() {
        let user = UserDetails::system();
        assert!(user.is_system());
        assert_eq!(user.id.to_string(), "00000000-0000-0000-0000-000000000000");
        assert_eq!(user.display_name, "Self-Service Ops");
    }

    #[test]
    fn test_deployment_status_roundtrip() {
        for status in [
            DeploymentStatus::Pending,
            DeploymentStatus::Running,
            DeploymentStatus::Undeployed,
            DeploymentStatus::Failed,
        ] {
            let parsed: DeploymentStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("gone".parse::<DeploymentStatus>().is_err());
    }

    #[test]
    fn test_deployment_event_status_unknown_values() {
        let payload: DeploymentStatusChangedPayload = serde_json::from_str(
            r#"{"deployment_id": "d-1", "status": "deployment_rolled_back"}"#,
        )
        .unwrap();
        assert_eq!(payload.status, DeploymentEventStatus::Unknown);

        let payload: DeploymentStatusChangedPayload = serde_json::from_str(
            r#"{"deployment_id": "d-1", "status": "deployment_completed"}"#,
        )
        .unwrap();
        assert_eq!(payload.status, DeploymentEventStatus::DeploymentCompleted);
    }

    #[test]
    fn test_task_state_payload_optional_tests_status() {
        let payload: TestRunTaskStatePayload = serde_json::from_str(
            r#"{
                "task_arn": "arn:aws:ecs:task/1",
                "test_suite": "smoke",
                "environment": "dev",
                "last_status": "PROVISIONING"
            }"#,
        )
        .unwrap();
        assert_eq!(payload.tests_status, None);
    }
}
