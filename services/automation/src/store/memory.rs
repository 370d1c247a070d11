//! In-memory store implementations.
//!
//! Each store guards its state with a single mutex, so every trait operation
//! is atomic with respect to the others, mirroring the single-statement
//! guarantees of the Postgres stores.
//!
//! ## Limitations
//!
//! - **Single-process only**: nothing is shared across process boundaries
//! - **No persistence**: all state is lost when the process exits

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cdp_id::{MigrationId, ScheduleId, TestRunId, WorkerId};
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::{
    AutoDeploymentTrigger, Correlatable, CorrelatedRecord, CorrelationStore, DatabaseMigration,
    Deployment, DeploymentSettings, DeploymentSettingsStore, DeploymentStore, DeploymentTrigger,
    LeaseStore, MatchKeys, MigrationStore, Schedule, ScheduleStore, StatusUpdate, TestRun,
    TestRunStore, TimeWindow, TriggerStore,
};
use crate::db::DbError;

/// Locks a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Correlatable records
// =============================================================================

/// In-memory table of correlatable records.
#[derive(Debug)]
pub struct MemoryCorrelationStore<R> {
    records: Mutex<Vec<R>>,
}

/// In-memory [`TestRunStore`].
pub type MemoryTestRunStore = MemoryCorrelationStore<TestRun>;

/// In-memory [`MigrationStore`].
pub type MemoryMigrationStore = MemoryCorrelationStore<DatabaseMigration>;

impl<R: Correlatable> Default for MemoryCorrelationStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Correlatable> MemoryCorrelationStore<R> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    /// Returns a snapshot of all records.
    pub fn records(&self) -> Vec<R> {
        lock(&self.records).clone()
    }

    fn insert(&self, record: &R) -> Result<(), DbError> {
        let mut records = lock(&self.records);
        if records.iter().any(|r| r.id() == record.id()) {
            return Err(DbError::Conflict(format!("record {} exists", record.id())));
        }
        records.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl<R: Correlatable> CorrelationStore for MemoryCorrelationStore<R> {
    async fn link(
        &self,
        keys: &MatchKeys,
        external_ref: &str,
        window: TimeWindow,
    ) -> Result<Option<CorrelatedRecord>, DbError> {
        let mut records = lock(&self.records);

        if records
            .iter()
            .any(|r| r.external_ref() == Some(external_ref))
        {
            return Ok(None);
        }

        let candidate = records
            .iter_mut()
            .filter(|r| {
                r.external_ref().is_none()
                    && r.keys() == *keys
                    && window.contains(r.created_at())
            })
            .max_by_key(|r| r.created_at());

        Ok(candidate.map(|record| {
            record.set_external_ref(external_ref, Utc::now());
            record.to_record()
        }))
    }

    async fn update_status(
        &self,
        external_ref: &str,
        update: &StatusUpdate,
    ) -> Result<bool, DbError> {
        let mut records = lock(&self.records);
        match records
            .iter_mut()
            .find(|r| r.external_ref() == Some(external_ref))
        {
            Some(record) => {
                record.apply_status(update);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl TestRunStore for MemoryCorrelationStore<TestRun> {
    async fn create(&self, run: &TestRun) -> Result<(), DbError> {
        self.insert(run)
    }

    async fn create_for_deployment(&self, run: &TestRun) -> Result<bool, DbError> {
        let mut records = lock(&self.records);
        let exists = records.iter().any(|r| {
            r.deployment_id.is_some()
                && r.deployment_id == run.deployment_id
                && r.test_suite == run.test_suite
                && r.environment == run.environment
        });
        if exists {
            return Ok(false);
        }
        records.push(run.clone());
        Ok(true)
    }

    async fn get(&self, run_id: TestRunId) -> Result<Option<TestRun>, DbError> {
        Ok(lock(&self.records)
            .iter()
            .find(|r| r.run_id == run_id)
            .cloned())
    }

    async fn delete(&self, run_id: TestRunId) -> Result<bool, DbError> {
        let mut records = lock(&self.records);
        let before = records.len();
        records.retain(|r| r.run_id != run_id);
        Ok(records.len() != before)
    }
}

#[async_trait]
impl MigrationStore for MemoryCorrelationStore<DatabaseMigration> {
    async fn create(&self, migration: &DatabaseMigration) -> Result<(), DbError> {
        self.insert(migration)
    }

    async fn get(&self, migration_id: MigrationId) -> Result<Option<DatabaseMigration>, DbError> {
        Ok(lock(&self.records)
            .iter()
            .find(|m| m.migration_id == migration_id)
            .cloned())
    }
}

// =============================================================================
// Deployments
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryDeploymentStore {
    deployments: Mutex<HashMap<String, Deployment>>,
}

impl MemoryDeploymentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn upsert(&self, deployment: &Deployment) -> Result<bool, DbError> {
        let mut deployments = lock(&self.deployments);
        if let Some(existing) = deployments.get(&deployment.deployment_id) {
            if existing.updated_at > deployment.updated_at {
                return Ok(false);
            }
        }
        deployments.insert(deployment.deployment_id.clone(), deployment.clone());
        Ok(true)
    }

    async fn get(&self, deployment_id: &str) -> Result<Option<Deployment>, DbError> {
        Ok(lock(&self.deployments).get(deployment_id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemoryDeploymentSettingsStore {
    settings: Mutex<HashMap<(String, String), DeploymentSettings>>,
}

impl MemoryDeploymentSettingsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentSettingsStore for MemoryDeploymentSettingsStore {
    async fn find(
        &self,
        service: &str,
        environment: &str,
    ) -> Result<Option<DeploymentSettings>, DbError> {
        Ok(lock(&self.settings)
            .get(&(service.to_string(), environment.to_string()))
            .cloned())
    }

    async fn upsert(&self, settings: &DeploymentSettings) -> Result<(), DbError> {
        lock(&self.settings).insert(
            (settings.service.clone(), settings.environment.clone()),
            settings.clone(),
        );
        Ok(())
    }
}

// =============================================================================
// Triggers
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryTriggerStore {
    auto_deploy: Mutex<HashMap<String, AutoDeploymentTrigger>>,
    deployment: Mutex<BTreeMap<(String, String), DeploymentTrigger>>,
}

impl MemoryTriggerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TriggerStore for MemoryTriggerStore {
    async fn find_auto_deploy(
        &self,
        service_name: &str,
    ) -> Result<Option<AutoDeploymentTrigger>, DbError> {
        Ok(lock(&self.auto_deploy).get(service_name).cloned())
    }

    async fn replace_auto_deploy(&self, trigger: &AutoDeploymentTrigger) -> Result<(), DbError> {
        lock(&self.auto_deploy).insert(trigger.service_name.clone(), trigger.clone());
        Ok(())
    }

    async fn delete_auto_deploy(&self, service_name: &str) -> Result<bool, DbError> {
        Ok(lock(&self.auto_deploy).remove(service_name).is_some())
    }

    async fn find_deployment_triggers(
        &self,
        repository: &str,
    ) -> Result<Vec<DeploymentTrigger>, DbError> {
        Ok(lock(&self.deployment)
            .values()
            .filter(|t| t.repository == repository)
            .cloned()
            .collect())
    }

    async fn replace_deployment_trigger(
        &self,
        trigger: &DeploymentTrigger,
    ) -> Result<(), DbError> {
        lock(&self.deployment).insert(
            (trigger.repository.clone(), trigger.test_suite.clone()),
            trigger.clone(),
        );
        Ok(())
    }

    async fn delete_deployment_trigger(
        &self,
        repository: &str,
        test_suite: &str,
    ) -> Result<bool, DbError> {
        Ok(lock(&self.deployment)
            .remove(&(repository.to_string(), test_suite.to_string()))
            .is_some())
    }
}

// =============================================================================
// Schedules
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryScheduleStore {
    schedules: Mutex<BTreeMap<ScheduleId, Schedule>>,
}

impl MemoryScheduleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn insert(&self, schedule: &Schedule) -> Result<(), DbError> {
        let mut schedules = lock(&self.schedules);
        if schedules.contains_key(&schedule.id) {
            return Err(DbError::Conflict(format!("schedule {} exists", schedule.id)));
        }
        schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get(&self, id: ScheduleId) -> Result<Option<Schedule>, DbError> {
        Ok(lock(&self.schedules).get(&id).cloned())
    }

    async fn replace(&self, schedule: &Schedule) -> Result<bool, DbError> {
        let mut schedules = lock(&self.schedules);
        match schedules.get_mut(&schedule.id) {
            Some(existing) => {
                *existing = schedule.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: ScheduleId) -> Result<bool, DbError> {
        Ok(lock(&self.schedules).remove(&id).is_some())
    }

    async fn list_for_entity(&self, entity_id: &str) -> Result<Vec<Schedule>, DbError> {
        Ok(lock(&self.schedules)
            .values()
            .filter(|s| s.task.entity_id() == entity_id)
            .cloned()
            .collect())
    }

    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>, DbError> {
        let mut due: Vec<Schedule> = lock(&self.schedules)
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_run_at);
        Ok(due)
    }

    async fn advance_next_run(
        &self,
        id: ScheduleId,
        expected: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut schedules = lock(&self.schedules);
        match schedules.get_mut(&id) {
            Some(schedule) if schedule.next_run_at == expected => {
                schedule.next_run_at = next;
                schedule.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// =============================================================================
// Leases
// =============================================================================

#[derive(Debug, Clone)]
struct MemoryLease {
    holder: WorkerId,
    expires_at: Instant,
}

/// In-memory lease table.
///
/// Handles created with [`MemoryLeaseStore::for_holder`] share the table, so
/// several simulated instances can contend for the same keys.
#[derive(Debug, Clone)]
pub struct MemoryLeaseStore {
    leases: Arc<Mutex<HashMap<String, MemoryLease>>>,
    holder: WorkerId,
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLeaseStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            leases: Arc::new(Mutex::new(HashMap::new())),
            holder: WorkerId::new(),
        }
    }

    /// A handle on the same lease table acting for another holder.
    #[must_use]
    pub fn for_holder(&self, holder: WorkerId) -> Self {
        Self {
            leases: Arc::clone(&self.leases),
            holder,
        }
    }

    pub fn holder(&self) -> WorkerId {
        self.holder
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, DbError> {
        let mut leases = lock(&self.leases);
        let now = Instant::now();

        if let Some(lease) = leases.get(key) {
            if lease.holder != self.holder && lease.expires_at > now {
                return Ok(false);
            }
        }

        leases.insert(
            key.to_string(),
            MemoryLease {
                holder: self.holder,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<(), DbError> {
        let mut leases = lock(&self.leases);
        if leases.get(key).is_some_and(|l| l.holder == self.holder) {
            leases.remove(key);
        }
        Ok(())
    }
}
