//! Scheduler background worker.
//!
//! Polls for due schedules on a fixed interval and runs each under a lease so
//! that only one service instance executes a given occurrence.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::recurrence::recalc;
use super::task::TaskExecutor;
use crate::db::DbError;
use crate::queue::shutdown_signalled;
use crate::store::{LeaseStore, Schedule, ScheduleStore};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between polls.
    pub interval: Duration,
    /// How late an occurrence may be and still run. Later ones are skipped.
    pub tolerance: chrono::Duration,
    /// Lease lifetime; must exceed the longest task execution.
    pub lease_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            tolerance: chrono::Duration::minutes(5),
            lease_ttl: Duration::from_secs(60),
        }
    }
}

/// Counters for one polling pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub due: usize,
    pub executed: usize,
    pub skipped_stale: usize,
    pub skipped_locked: usize,
    pub failed: usize,
}

fn lease_key(schedule: &Schedule) -> String {
    format!("schedule:{}", schedule.id)
}

pub struct SchedulerWorker {
    schedules: Arc<dyn ScheduleStore>,
    leases: Arc<dyn LeaseStore>,
    executor: TaskExecutor,
    config: SchedulerConfig,
}

impl SchedulerWorker {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        leases: Arc<dyn LeaseStore>,
        executor: TaskExecutor,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            schedules,
            leases,
            executor,
            config,
        }
    }

    /// Run the scheduler worker until shutdown is signaled.
    #[instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            tolerance_secs = self.config.tolerance.num_seconds(),
            "Starting scheduler worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_signalled(&mut shutdown) => {
                    info!("Scheduler worker shutting down");
                    break;
                }
            }

            // An abandoned pass leaves its lease to expire by TTL.
            let result = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown) => {
                    info!("Scheduler worker shutting down, abandoning pass");
                    break;
                }
                result = self.run_pass(Utc::now()) => result,
            };

            match result {
                Ok(stats) if stats.due > 0 => {
                    info!(
                        due = stats.due,
                        executed = stats.executed,
                        skipped_stale = stats.skipped_stale,
                        skipped_locked = stats.skipped_locked,
                        failed = stats.failed,
                        "Scheduler pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Scheduler pass failed"),
            }
        }
    }

    /// Runs every schedule due at `now` once.
    ///
    /// Only failing to list due schedules is an error; per-schedule failures
    /// are logged and counted.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<PassStats, DbError> {
        let due = self.schedules.fetch_due(now).await?;
        let mut stats = PassStats {
            due: due.len(),
            ..PassStats::default()
        };

        for schedule in &due {
            let key = lease_key(schedule);
            match self.leases.acquire(&key, self.config.lease_ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(schedule_id = %schedule.id, "Schedule locked by another worker");
                    stats.skipped_locked += 1;
                    continue;
                }
                Err(e) => {
                    error!(schedule_id = %schedule.id, error = %e, "Failed to acquire schedule lease");
                    stats.failed += 1;
                    continue;
                }
            }

            if let Err(e) = self.run_locked(schedule, now, &mut stats).await {
                error!(schedule_id = %schedule.id, error = %e, "Failed to advance schedule");
                stats.failed += 1;
            }

            if let Err(e) = self.leases.release(&key).await {
                warn!(schedule_id = %schedule.id, error = %e, "Failed to release schedule lease");
            }
        }

        Ok(stats)
    }

    /// Executes and advances one schedule. The caller holds its lease.
    async fn run_locked(
        &self,
        listed: &Schedule,
        now: DateTime<Utc>,
        stats: &mut PassStats,
    ) -> Result<(), DbError> {
        // Another instance may have advanced it between listing and locking.
        let Some(schedule) = self.schedules.get(listed.id).await? else {
            return Ok(());
        };
        if !schedule.is_due(now) {
            debug!(schedule_id = %schedule.id, "Schedule no longer due");
            return Ok(());
        }
        let Some(scheduled_at) = schedule.next_run_at else {
            return Ok(());
        };

        if scheduled_at >= now - self.config.tolerance {
            match self.executor.execute(&schedule).await {
                Ok(()) => stats.executed += 1,
                Err(e) => {
                    error!(schedule_id = %schedule.id, error = %e, "Scheduled task failed");
                    stats.failed += 1;
                }
            }
        } else {
            warn!(
                schedule_id = %schedule.id,
                scheduled_at = %scheduled_at,
                "Skipping stale occurrence"
            );
            stats.skipped_stale += 1;
        }

        let next = match recalc(&schedule.cron_expression, now, schedule.end_date) {
            Ok(next) => next,
            Err(e) => {
                error!(schedule_id = %schedule.id, error = %e, "Invalid stored recurrence, exhausting schedule");
                None
            }
        };

        if !self
            .schedules
            .advance_next_run(schedule.id, schedule.next_run_at, next, now)
            .await?
        {
            debug!(schedule_id = %schedule.id, "Schedule changed while running, keeping new next run");
        } else if next.is_none() {
            info!(schedule_id = %schedule.id, "Schedule exhausted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::memory::RecordingOps;
    use crate::ops::{
        AutoDeployRequest, OpsError, SelfServiceOps, ServiceStatus, TriggerTestSuiteRequest,
    };
    use crate::scheduler::{ScheduleConfig, ScheduleTask, TestSuiteDeployTask};
    use crate::store::memory::{MemoryLeaseStore, MemoryScheduleStore, MemoryTestRunStore};
    use cdp_events::UserDetails;
    use cdp_id::ScheduleId;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, h, m, 0).unwrap()
    }

    fn hourly(next_run_at: DateTime<Utc>) -> Schedule {
        Schedule {
            id: ScheduleId::new(),
            enabled: true,
            config: ScheduleConfig::Cron {
                expression: "0 0 * * * *".into(),
            },
            cron_expression: "0 0 * * * *".into(),
            task: ScheduleTask::TestSuiteDeploy(TestSuiteDeployTask {
                entity_id: "smoke".into(),
                environment: "dev".into(),
                cpu: 1024,
                memory: 2048,
                profile: None,
            }),
            created_at: at(0, 0),
            updated_at: at(0, 0),
            next_run_at: Some(next_run_at),
            start_date: at(0, 0),
            end_date: None,
            owner: UserDetails::system(),
        }
    }

    struct Fixture {
        schedules: Arc<MemoryScheduleStore>,
        ops: Arc<RecordingOps>,
        test_runs: Arc<MemoryTestRunStore>,
        worker: SchedulerWorker,
    }

    fn fixture() -> Fixture {
        let schedules = Arc::new(MemoryScheduleStore::new());
        let ops = Arc::new(RecordingOps::new());
        let test_runs = Arc::new(MemoryTestRunStore::new());
        let executor = TaskExecutor::new(ops.clone(), test_runs.clone());
        let worker = SchedulerWorker::new(
            schedules.clone(),
            Arc::new(MemoryLeaseStore::new()),
            executor,
            SchedulerConfig::default(),
        );
        Fixture {
            schedules,
            ops,
            test_runs,
            worker,
        }
    }

    /// Ops whose test suite trigger never answers in time.
    struct HangingOps;

    #[async_trait::async_trait]
    impl SelfServiceOps for HangingOps {
        async fn trigger_test_suite(
            &self,
            _request: &TriggerTestSuiteRequest,
        ) -> Result<Option<String>, OpsError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }

        async fn auto_deploy_service(&self, _request: &AutoDeployRequest) -> Result<(), OpsError> {
            Ok(())
        }

        async fn service_status(&self, _service: &str) -> Result<Option<ServiceStatus>, OpsError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_due_schedule_runs_and_advances() {
        let fixture = fixture();
        let schedule = hourly(at(10, 0));
        fixture.schedules.insert(&schedule).await.unwrap();

        let stats = fixture.worker.run_pass(at(10, 2)).await.unwrap();

        assert_eq!(stats.executed, 1);
        assert_eq!(fixture.ops.test_suite_calls().len(), 1);
        let stored = fixture.schedules.get(schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.next_run_at, Some(at(11, 0)));
    }

    #[tokio::test]
    async fn test_stale_occurrence_is_skipped_but_advanced() {
        let fixture = fixture();
        let schedule = hourly(at(10, 0));
        fixture.schedules.insert(&schedule).await.unwrap();

        let stats = fixture.worker.run_pass(at(10, 6)).await.unwrap();

        assert_eq!(stats.skipped_stale, 1);
        assert!(fixture.ops.calls().is_empty());
        let stored = fixture.schedules.get(schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.next_run_at, Some(at(11, 0)));
    }

    #[tokio::test]
    async fn test_failed_task_still_advances() {
        let fixture = fixture();
        fixture.ops.fail_environment("dev");
        let schedule = hourly(at(10, 0));
        fixture.schedules.insert(&schedule).await.unwrap();

        let stats = fixture.worker.run_pass(at(10, 0)).await.unwrap();

        assert_eq!(stats.failed, 1);
        let stored = fixture.schedules.get(schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.next_run_at, Some(at(11, 0)));
    }

    #[tokio::test]
    async fn test_invalid_stored_cron_exhausts() {
        let fixture = fixture();
        let mut schedule = hourly(at(10, 0));
        schedule.cron_expression = "bogus".into();
        fixture.schedules.insert(&schedule).await.unwrap();

        fixture.worker.run_pass(at(10, 0)).await.unwrap();

        let stored = fixture.schedules.get(schedule.id).await.unwrap().unwrap();
        assert!(stored.is_exhausted());
        assert_eq!(fixture.worker.run_pass(at(12, 0)).await.unwrap().due, 0);
    }

    #[tokio::test]
    async fn test_run_is_stamped_when_the_task_starts() {
        let fixture = fixture();
        let schedule = hourly(at(10, 0));
        fixture.schedules.insert(&schedule).await.unwrap();
        let before = Utc::now();

        let stats = fixture.worker.run_pass(at(10, 2)).await.unwrap();

        assert_eq!(stats.executed, 1);
        let runs = fixture.test_runs.records();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].created_at >= before);
        assert_eq!(runs[0].created_at, runs[0].updated_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_a_running_pass() {
        let schedules = Arc::new(MemoryScheduleStore::new());
        schedules
            .insert(&hourly(Utc::now() - chrono::Duration::seconds(1)))
            .await
            .unwrap();
        let executor = TaskExecutor::new(Arc::new(HangingOps), Arc::new(MemoryTestRunStore::new()));
        let worker = SchedulerWorker::new(
            schedules,
            Arc::new(MemoryLeaseStore::new()),
            executor,
            SchedulerConfig {
                interval: Duration::from_millis(10),
                ..SchedulerConfig::default()
            },
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        let joined = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(joined.is_ok(), "worker kept running the pass after shutdown");
    }
}
