//! Persisted schedules.

use async_trait::async_trait;
use cdp_events::UserDetails;
use cdp_id::ScheduleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::DbError;
use crate::scheduler::{ScheduleConfig, ScheduleTask};

/// A recurring (or one-off) task.
///
/// `next_run_at` is a cache of `recalc(cron_expression, from, end_date)`;
/// `None` means the schedule is exhausted and will not fire again until its
/// recurrence is edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub enabled: bool,
    pub config: ScheduleConfig,
    pub cron_expression: String,
    pub task: ScheduleTask,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub owner: UserDetails,
}

impl Schedule {
    /// Returns true if the poller should pick this schedule up at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.is_some_and(|at| at <= now)
    }

    /// Returns true once no further occurrence exists.
    pub fn is_exhausted(&self) -> bool {
        self.next_run_at.is_none()
    }
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Inserts a schedule; fails with [`DbError::Conflict`] if the id exists.
    async fn insert(&self, schedule: &Schedule) -> Result<(), DbError>;

    async fn get(&self, id: ScheduleId) -> Result<Option<Schedule>, DbError>;

    /// Overwrites every mutable field. Returns false if the schedule is gone.
    async fn replace(&self, schedule: &Schedule) -> Result<bool, DbError>;

    async fn delete(&self, id: ScheduleId) -> Result<bool, DbError>;

    /// Schedules whose task targets `entity_id`.
    async fn list_for_entity(&self, entity_id: &str) -> Result<Vec<Schedule>, DbError>;

    /// Every enabled schedule with `next_run_at <= now`, oldest first.
    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>, DbError>;

    /// Sets `next_run_at` to `next` only if it still equals `expected`.
    ///
    /// Returns false when another writer changed it first.
    async fn advance_next_run(
        &self,
        id: ScheduleId,
        expected: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError>;
}
