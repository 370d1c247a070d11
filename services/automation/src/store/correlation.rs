//! Correlatable records: actions requested by this service and later
//! confirmed by an infrastructure event that only knows an external reference.

use async_trait::async_trait;
use cdp_events::UserDetails;
use cdp_id::{MigrationId, TestRunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::DbError;

/// The attributes a confirmation event can be matched on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchKeys {
    /// Test suite or service name.
    pub subject: String,
    pub environment: String,
}

impl MatchKeys {
    pub fn new(subject: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            environment: environment.into(),
        }
    }
}

/// Inclusive `created_at` range a record must fall in to be linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Status change reported for an already-linked record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: String,
    /// Secondary status (test results for test runs); `None` keeps the stored value.
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Backend-neutral view of a correlatable record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatedRecord {
    pub id: String,
    pub keys: MatchKeys,
    pub created_at: DateTime<Utc>,
    pub external_ref: Option<String>,
    pub status: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A test suite run requested by this service.
///
/// Linked to its ECS task through `task_arn`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    pub run_id: TestRunId,
    pub test_suite: String,
    pub environment: String,
    /// Set when the run was triggered by a completed deployment.
    pub deployment_id: Option<String>,
    pub user: UserDetails,
    pub created_at: DateTime<Utc>,
    pub task_arn: Option<String>,
    pub task_status: Option<String>,
    pub tests_status: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TestRun {
    /// Status recorded when the run is requested, before the task exists.
    pub const STARTING: &'static str = "starting";

    /// A run in the `starting` state.
    pub fn starting(
        test_suite: impl Into<String>,
        environment: impl Into<String>,
        deployment_id: Option<String>,
        user: UserDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: TestRunId::new(),
            test_suite: test_suite.into(),
            environment: environment.into(),
            deployment_id,
            user,
            created_at: now,
            task_arn: None,
            task_status: Some(Self::STARTING.to_string()),
            tests_status: None,
            updated_at: now,
        }
    }
}

/// A database migration requested by this service.
///
/// Linked to its build through `build_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMigration {
    pub migration_id: MigrationId,
    pub service: String,
    pub environment: String,
    pub sub_version: String,
    pub user: UserDetails,
    pub created_at: DateTime<Utc>,
    pub build_id: Option<String>,
    pub status: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DatabaseMigration {
    pub const STARTING: &'static str = "starting";

    pub fn starting(
        service: impl Into<String>,
        environment: impl Into<String>,
        sub_version: impl Into<String>,
        user: UserDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            migration_id: MigrationId::new(),
            service: service.into(),
            environment: environment.into(),
            sub_version: sub_version.into(),
            user,
            created_at: now,
            build_id: None,
            status: Some(Self::STARTING.to_string()),
            updated_at: now,
        }
    }
}

/// Field access shared by all correlatable record types.
///
/// Lets the in-memory store implement linking once for every record type.
pub trait Correlatable: Clone + Send + Sync + 'static {
    fn id(&self) -> String;
    fn keys(&self) -> MatchKeys;
    fn created_at(&self) -> DateTime<Utc>;
    fn external_ref(&self) -> Option<&str>;
    fn set_external_ref(&mut self, external_ref: &str, at: DateTime<Utc>);
    fn apply_status(&mut self, update: &StatusUpdate);
    fn status(&self) -> Option<&str>;
    fn updated_at(&self) -> DateTime<Utc>;

    fn to_record(&self) -> CorrelatedRecord {
        CorrelatedRecord {
            id: self.id(),
            keys: self.keys(),
            created_at: self.created_at(),
            external_ref: self.external_ref().map(str::to_string),
            status: self.status().map(str::to_string),
            updated_at: self.updated_at(),
        }
    }
}

impl Correlatable for TestRun {
    fn id(&self) -> String {
        self.run_id.to_string()
    }

    fn keys(&self) -> MatchKeys {
        MatchKeys::new(&self.test_suite, &self.environment)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn external_ref(&self) -> Option<&str> {
        self.task_arn.as_deref()
    }

    fn set_external_ref(&mut self, external_ref: &str, at: DateTime<Utc>) {
        self.task_arn = Some(external_ref.to_string());
        self.updated_at = at;
    }

    fn apply_status(&mut self, update: &StatusUpdate) {
        self.task_status = Some(update.status.clone());
        if let Some(detail) = &update.detail {
            self.tests_status = Some(detail.clone());
        }
        self.updated_at = update.at;
    }

    fn status(&self) -> Option<&str> {
        self.task_status.as_deref()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Correlatable for DatabaseMigration {
    fn id(&self) -> String {
        self.migration_id.to_string()
    }

    fn keys(&self) -> MatchKeys {
        MatchKeys::new(&self.service, &self.environment)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn external_ref(&self) -> Option<&str> {
        self.build_id.as_deref()
    }

    fn set_external_ref(&mut self, external_ref: &str, at: DateTime<Utc>) {
        self.build_id = Some(external_ref.to_string());
        self.updated_at = at;
    }

    fn apply_status(&mut self, update: &StatusUpdate) {
        self.status = Some(update.status.clone());
        self.updated_at = update.at;
    }

    fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Storage operations the correlator relies on.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Atomically sets `external_ref` on the newest record whose keys match,
    /// whose `external_ref` is unset, and whose `created_at` lies in `window`.
    ///
    /// Returns `None` when nothing matches or when `external_ref` is already
    /// linked to another record. Must be a single conditional update: two
    /// concurrent calls can never both link.
    async fn link(
        &self,
        keys: &MatchKeys,
        external_ref: &str,
        window: TimeWindow,
    ) -> Result<Option<CorrelatedRecord>, DbError>;

    /// Applies a status update to the record linked to `external_ref`.
    ///
    /// Returns false if no record carries that reference.
    async fn update_status(&self, external_ref: &str, update: &StatusUpdate)
        -> Result<bool, DbError>;
}

/// Test run persistence.
#[async_trait]
pub trait TestRunStore: CorrelationStore {
    /// Inserts a run.
    async fn create(&self, run: &TestRun) -> Result<(), DbError>;

    /// Inserts a deployment-triggered run unless one already exists for
    /// `(test_suite, environment, deployment_id)`.
    ///
    /// Returns false when a run already exists; the check and the insert are
    /// one statement.
    async fn create_for_deployment(&self, run: &TestRun) -> Result<bool, DbError>;

    async fn get(&self, run_id: TestRunId) -> Result<Option<TestRun>, DbError>;

    /// Removes a run whose action request failed, so a later event can retry it.
    async fn delete(&self, run_id: TestRunId) -> Result<bool, DbError>;
}

/// Database migration persistence.
#[async_trait]
pub trait MigrationStore: CorrelationStore {
    async fn create(&self, migration: &DatabaseMigration) -> Result<(), DbError>;

    async fn get(&self, migration_id: MigrationId) -> Result<Option<DatabaseMigration>, DbError>;
}
