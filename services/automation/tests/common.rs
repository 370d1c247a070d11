#![allow(dead_code)]

use std::sync::Arc;

use cdp_automation::correlation::{CorrelationConfig, Correlator};
use cdp_automation::handlers::{
    DeploymentLifecycleHandler, EventHandler, HandlerRegistry, MigrationBuildHandler,
    TestRunTaskHandler,
};
use cdp_automation::ops::memory::RecordingOps;
use cdp_automation::store::memory::{
    MemoryDeploymentSettingsStore, MemoryDeploymentStore, MemoryMigrationStore,
    MemoryTestRunStore, MemoryTriggerStore,
};
use cdp_automation::store::{MigrationStore, TestRunStore};
use cdp_automation::triggers::{
    AutoDeployEngine, TestRunTriggerConfig, TestRunTriggerEngine, TriggerConfigService,
};
use cdp_events::EventEnvelope;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cdp_automation=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn encode<P: Serialize>(event_type: &str, at: DateTime<Utc>, payload: &P) -> Vec<u8> {
    EventEnvelope::from_payload(event_type, at, payload)
        .unwrap()
        .encode()
        .unwrap()
}

/// Every handler the service registers, wired to in-memory stores.
pub struct Platform {
    pub deployments: Arc<MemoryDeploymentStore>,
    pub settings: Arc<MemoryDeploymentSettingsStore>,
    pub triggers: Arc<MemoryTriggerStore>,
    pub test_runs: Arc<MemoryTestRunStore>,
    pub migrations: Arc<MemoryMigrationStore>,
    pub ops: Arc<RecordingOps>,
    pub trigger_config: TriggerConfigService,
}

impl Platform {
    pub fn new() -> Self {
        let triggers = Arc::new(MemoryTriggerStore::new());
        Self {
            deployments: Arc::new(MemoryDeploymentStore::new()),
            settings: Arc::new(MemoryDeploymentSettingsStore::new()),
            trigger_config: TriggerConfigService::new(triggers.clone()),
            triggers,
            test_runs: Arc::new(MemoryTestRunStore::new()),
            migrations: Arc::new(MemoryMigrationStore::new()),
            ops: Arc::new(RecordingOps::new()),
        }
    }

    pub fn registry(&self) -> HandlerRegistry {
        let correlation = CorrelationConfig::default();
        let handlers: Vec<Arc<dyn EventHandler>> = vec![
            Arc::new(DeploymentLifecycleHandler::new(self.deployments.clone())),
            Arc::new(TestRunTaskHandler::new(Correlator::new(
                self.test_runs.clone() as Arc<dyn TestRunStore>,
                correlation,
            ))),
            Arc::new(MigrationBuildHandler::new(Correlator::new(
                self.migrations.clone() as Arc<dyn MigrationStore>,
                correlation,
            ))),
            Arc::new(AutoDeployEngine::new(
                self.triggers.clone(),
                self.settings.clone(),
                self.ops.clone(),
            )),
            Arc::new(TestRunTriggerEngine::new(
                self.deployments.clone(),
                self.triggers.clone(),
                self.test_runs.clone(),
                self.ops.clone(),
                TestRunTriggerConfig::default(),
            )),
        ];
        HandlerRegistry::from_handlers(handlers).unwrap()
    }
}
