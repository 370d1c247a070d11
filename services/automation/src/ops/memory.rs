//! A [`SelfServiceOps`] that records calls instead of making them.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{AutoDeployRequest, OpsError, SelfServiceOps, ServiceStatus, TriggerTestSuiteRequest};

/// A call made through [`RecordingOps`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpsCall {
    TriggerTestSuite(TriggerTestSuiteRequest),
    AutoDeploy(AutoDeployRequest),
}

#[derive(Debug, Default)]
struct Recorded {
    calls: Vec<OpsCall>,
    failing_environments: HashSet<String>,
    statuses: HashMap<String, ServiceStatus>,
}

/// Records every call; calls for a failing environment return a 500 status error.
///
/// Failed calls are recorded too.
#[derive(Debug, Default)]
pub struct RecordingOps {
    inner: Mutex<Recorded>,
}

impl RecordingOps {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes calls targeting `environment` fail.
    pub fn fail_environment(&self, environment: impl Into<String>) {
        self.inner().failing_environments.insert(environment.into());
    }

    pub fn set_status(&self, service: impl Into<String>, status: ServiceStatus) {
        self.inner().statuses.insert(service.into(), status);
    }

    pub fn calls(&self) -> Vec<OpsCall> {
        self.inner().calls.clone()
    }

    pub fn test_suite_calls(&self) -> Vec<TriggerTestSuiteRequest> {
        self.inner()
            .calls
            .iter()
            .filter_map(|c| match c {
                OpsCall::TriggerTestSuite(r) => Some(r.clone()),
                OpsCall::AutoDeploy(_) => None,
            })
            .collect()
    }

    pub fn auto_deploy_calls(&self) -> Vec<AutoDeployRequest> {
        self.inner()
            .calls
            .iter()
            .filter_map(|c| match c {
                OpsCall::AutoDeploy(r) => Some(r.clone()),
                OpsCall::TriggerTestSuite(_) => None,
            })
            .collect()
    }

    fn record(&self, call: OpsCall, environment: &str) -> Result<(), OpsError> {
        let mut inner = self.inner();
        inner.calls.push(call);
        if inner.failing_environments.contains(environment) {
            return Err(OpsError::Status {
                status: 500,
                body: format!("environment {environment} unavailable"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SelfServiceOps for RecordingOps {
    async fn trigger_test_suite(
        &self,
        request: &TriggerTestSuiteRequest,
    ) -> Result<Option<String>, OpsError> {
        self.record(OpsCall::TriggerTestSuite(request.clone()), &request.environment)?;
        Ok(None)
    }

    async fn auto_deploy_service(&self, request: &AutoDeployRequest) -> Result<(), OpsError> {
        self.record(OpsCall::AutoDeploy(request.clone()), &request.environment)
    }

    async fn service_status(&self, service: &str) -> Result<Option<ServiceStatus>, OpsError> {
        Ok(self.inner().statuses.get(service).cloned())
    }
}
