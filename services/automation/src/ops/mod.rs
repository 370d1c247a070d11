//! Outbound calls to the self-service ops API.
//!
//! Every platform action this service takes (deploying a service, starting a
//! test suite) goes through [`SelfServiceOps`]. The HTTP implementation is
//! [`SelfServiceOpsClient`]; [`memory::RecordingOps`] records calls for tests.

mod client;
pub mod memory;

pub use client::SelfServiceOpsClient;

use async_trait::async_trait;
use cdp_events::UserDetails;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request to start a test suite run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerTestSuiteRequest {
    /// Test suite image to run.
    pub image_name: String,
    pub environment: String,
    pub cpu: i32,
    pub memory: i32,
    pub user: UserDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// Request to deploy a service version with stored settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoDeployRequest {
    pub image_name: String,
    pub version: String,
    pub environment: String,
    pub user: UserDetails,
    pub cpu: i32,
    pub memory: i32,
    pub instance_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<String>,
}

/// Repository status reported by the ops API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStatus {
    pub status: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub creator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub repository_status: RepositoryStatus,
}

/// Errors calling the ops API.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("ops API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ops API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid ops API response: {0}")]
    Decode(String),

    #[error("invalid ops API base URL: {0}")]
    InvalidBaseUrl(String),
}

#[async_trait]
pub trait SelfServiceOps: Send + Sync {
    /// Starts a test suite run. Returns the run id if the API reports one.
    async fn trigger_test_suite(
        &self,
        request: &TriggerTestSuiteRequest,
    ) -> Result<Option<String>, OpsError>;

    async fn auto_deploy_service(&self, request: &AutoDeployRequest) -> Result<(), OpsError>;

    /// Current status of `service`, or `None` if the API does not know it.
    async fn service_status(&self, service: &str) -> Result<Option<ServiceStatus>, OpsError>;
}
