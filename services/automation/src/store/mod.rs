//! Storage abstractions.
//!
//! Every piece of state the workers touch sits behind a trait defined here.
//! Postgres implementations live in [`crate::db`]; [`memory`] provides
//! in-process implementations with the same atomicity guarantees for tests
//! and local runs.
//!
//! Any read-then-write that must be race-free across instances (correlation
//! linking, test run de-duplication, schedule advancement, leases) is a single
//! conditional operation on the store, never a separate read and write.

mod correlation;
mod deployments;
mod leases;
pub mod memory;
mod schedules;
mod triggers;

pub use correlation::{
    Correlatable, CorrelatedRecord, CorrelationStore, DatabaseMigration, MatchKeys,
    MigrationStore, StatusUpdate, TestRun, TestRunStore, TimeWindow,
};
pub use deployments::{Deployment, DeploymentSettings, DeploymentSettingsStore, DeploymentStore};
pub use leases::LeaseStore;
pub use schedules::{Schedule, ScheduleStore};
pub use triggers::{AutoDeploymentTrigger, DeploymentTrigger, TriggerStore};
