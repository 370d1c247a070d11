//! Schedule management.

use std::sync::Arc;

use cdp_events::UserDetails;
use cdp_id::ScheduleId;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::recurrence::{recalc, ScheduleConfig, ScheduleError};
use super::task::ScheduleTask;
use crate::store::{Schedule, ScheduleStore};

/// Input for [`ScheduleService::create`].
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub config: ScheduleConfig,
    pub task: ScheduleTask,
    /// Defaults to the creation time.
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub owner: UserDetails,
    pub enabled: bool,
}

/// Creates and edits schedules, keeping `cron_expression` and `next_run_at`
/// consistent with the recurrence rule.
#[derive(Clone)]
pub struct ScheduleService {
    store: Arc<dyn ScheduleStore>,
}

/// First occurrence at or after `start`, but never in the past.
fn first_run(
    cron_expression: &str,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let from = if start_date > now {
        // recalc is exclusive; an occurrence exactly at start_date counts.
        start_date - Duration::seconds(1)
    } else {
        now
    };
    recalc(cron_expression, from, end_date)
}

fn check_dates(
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
) -> Result<(), ScheduleError> {
    if end_date.is_some_and(|end| end < start_date) {
        return Err(ScheduleError::InvalidRecurrence(
            "end_date is before start_date".to_string(),
        ));
    }
    Ok(())
}

impl ScheduleService {
    pub fn new(store: Arc<dyn ScheduleStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        new: NewSchedule,
        now: DateTime<Utc>,
    ) -> Result<Schedule, ScheduleError> {
        let start_date = new.start_date.unwrap_or(now);
        check_dates(start_date, new.end_date)?;
        let cron_expression = new.config.to_cron()?;
        let next_run_at = first_run(&cron_expression, start_date, new.end_date, now)?;

        let schedule = Schedule {
            id: ScheduleId::new(),
            enabled: new.enabled,
            config: new.config,
            cron_expression,
            task: new.task,
            created_at: now,
            updated_at: now,
            next_run_at,
            start_date,
            end_date: new.end_date,
            owner: new.owner,
        };
        self.store.insert(&schedule).await?;

        info!(
            schedule_id = %schedule.id,
            cron = %schedule.cron_expression,
            next_run_at = ?schedule.next_run_at,
            "Schedule created"
        );
        Ok(schedule)
    }

    pub async fn get(&self, id: ScheduleId) -> Result<Schedule, ScheduleError> {
        self.store
            .get(id)
            .await?
            .ok_or(ScheduleError::NotFound(id))
    }

    pub async fn list_for_entity(&self, entity_id: &str) -> Result<Vec<Schedule>, ScheduleError> {
        Ok(self.store.list_for_entity(entity_id).await?)
    }

    /// Replaces the recurrence rule and date range. Also revives exhausted schedules.
    pub async fn update_config(
        &self,
        id: ScheduleId,
        config: ScheduleConfig,
        start_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Schedule, ScheduleError> {
        check_dates(start_date, end_date)?;
        let cron_expression = config.to_cron()?;
        let next_run_at = first_run(&cron_expression, start_date, end_date, now)?;

        let mut schedule = self.get(id).await?;
        schedule.config = config;
        schedule.cron_expression = cron_expression;
        schedule.start_date = start_date;
        schedule.end_date = end_date;
        schedule.next_run_at = next_run_at;
        schedule.updated_at = now;
        self.save(&schedule).await?;

        info!(
            schedule_id = %id,
            cron = %schedule.cron_expression,
            next_run_at = ?schedule.next_run_at,
            "Schedule recurrence updated"
        );
        Ok(schedule)
    }

    /// Enables or disables a schedule.
    ///
    /// Enabling a schedule whose next run has passed moves the next run to
    /// the first occurrence after `now`, so re-enabling never fires stale runs.
    pub async fn set_enabled(
        &self,
        id: ScheduleId,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<Schedule, ScheduleError> {
        let mut schedule = self.get(id).await?;
        if enabled && schedule.next_run_at.is_some_and(|at| at < now) {
            schedule.next_run_at = recalc(&schedule.cron_expression, now, schedule.end_date)?;
        }
        schedule.enabled = enabled;
        schedule.updated_at = now;
        self.save(&schedule).await?;

        info!(schedule_id = %id, enabled, "Schedule toggled");
        Ok(schedule)
    }

    pub async fn delete(&self, id: ScheduleId) -> Result<bool, ScheduleError> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            info!(schedule_id = %id, "Schedule deleted");
        }
        Ok(deleted)
    }

    /// Recomputes `next_run_at` from `now`.
    pub async fn recalculate(
        &self,
        id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<Schedule, ScheduleError> {
        let mut schedule = self.get(id).await?;
        schedule.next_run_at = first_run(
            &schedule.cron_expression,
            schedule.start_date,
            schedule.end_date,
            now,
        )?;
        schedule.updated_at = now;
        self.save(&schedule).await?;
        Ok(schedule)
    }

    async fn save(&self, schedule: &Schedule) -> Result<(), ScheduleError> {
        if !self.store.replace(schedule).await? {
            return Err(ScheduleError::NotFound(schedule.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::recurrence::IntervalUnit;
    use crate::scheduler::task::TestSuiteDeployTask;
    use crate::store::memory::MemoryScheduleStore;
    use chrono::{NaiveTime, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, h, m, 0).unwrap()
    }

    fn task() -> ScheduleTask {
        ScheduleTask::TestSuiteDeploy(TestSuiteDeployTask {
            entity_id: "smoke".into(),
            environment: "dev".into(),
            cpu: 1024,
            memory: 2048,
            profile: None,
        })
    }

    fn new_schedule(config: ScheduleConfig) -> NewSchedule {
        NewSchedule {
            config,
            task: task(),
            start_date: None,
            end_date: None,
            owner: UserDetails::system(),
            enabled: true,
        }
    }

    fn service() -> ScheduleService {
        ScheduleService::new(Arc::new(MemoryScheduleStore::new()))
    }

    #[tokio::test]
    async fn test_create_computes_next_run() {
        let service = service();
        let config = ScheduleConfig::Daily {
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        };

        let schedule = service.create(new_schedule(config), at(8, 0)).await.unwrap();

        assert_eq!(schedule.cron_expression, "0 0 9 * * *");
        assert_eq!(schedule.next_run_at, Some(at(9, 0)));
        assert_eq!(service.get(schedule.id).await.unwrap(), schedule);
        assert_eq!(service.list_for_entity("smoke").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_future_start_date_counts_exact_occurrence() {
        let service = service();
        let mut new = new_schedule(ScheduleConfig::Interval {
            value: 30,
            unit: IntervalUnit::Minutes,
        });
        new.start_date = Some(at(12, 0));

        let schedule = service.create(new, at(8, 5)).await.unwrap();
        assert_eq!(schedule.next_run_at, Some(at(12, 0)));
    }

    #[tokio::test]
    async fn test_end_before_start_is_rejected() {
        let service = service();
        let mut new = new_schedule(ScheduleConfig::Daily {
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        });
        new.start_date = Some(at(12, 0));
        new.end_date = Some(at(11, 0));

        let err = service.create(new, at(8, 0)).await.unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidRecurrence(_)));
    }

    #[tokio::test]
    async fn test_update_config_revives_exhausted_schedule() {
        let service = service();
        let schedule = service
            .create(
                new_schedule(ScheduleConfig::Once { run_at: at(7, 0) }),
                at(8, 0),
            )
            .await
            .unwrap();
        assert!(schedule.is_exhausted());

        let updated = service
            .update_config(
                schedule.id,
                ScheduleConfig::Once { run_at: at(10, 0) },
                at(8, 0),
                None,
                at(8, 30),
            )
            .await
            .unwrap();
        assert_eq!(updated.next_run_at, Some(at(10, 0)));
    }

    #[tokio::test]
    async fn test_reenabling_skips_missed_runs() {
        let service = service();
        let schedule = service
            .create(
                new_schedule(ScheduleConfig::Interval {
                    value: 1,
                    unit: IntervalUnit::Hours,
                }),
                at(8, 0),
            )
            .await
            .unwrap();
        assert_eq!(schedule.next_run_at, Some(at(9, 0)));

        service.set_enabled(schedule.id, false, at(8, 10)).await.unwrap();
        let enabled = service.set_enabled(schedule.id, true, at(11, 30)).await.unwrap();

        assert!(enabled.enabled);
        assert_eq!(enabled.next_run_at, Some(at(12, 0)));
    }

    #[tokio::test]
    async fn test_missing_schedule_is_not_found() {
        let service = service();
        let err = service.get(ScheduleId::new()).await.unwrap_err();
        assert!(matches!(err, ScheduleError::NotFound(_)));
        assert!(!service.delete(ScheduleId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_reloaded_schedule_recomputes_same_next_run() {
        let service = service();
        let schedule = service
            .create(
                new_schedule(ScheduleConfig::Weekly {
                    time: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
                    days_of_week: vec![chrono::Weekday::Tue, chrono::Weekday::Thu],
                }),
                at(8, 0),
            )
            .await
            .unwrap();

        let json = serde_json::to_string(&schedule).unwrap();
        let reloaded: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded, schedule);

        let now = at(12, 0);
        assert_eq!(
            recalc(&reloaded.cron_expression, now, reloaded.end_date).unwrap(),
            recalc(&schedule.cron_expression, now, schedule.end_date).unwrap()
        );
        assert_eq!(
            reloaded.config.to_cron().unwrap(),
            schedule.cron_expression
        );
    }
}
