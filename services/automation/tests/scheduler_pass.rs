//! Scheduler passes across several service instances.

mod common;

use std::sync::Arc;

use cdp_automation::ops::memory::RecordingOps;
use cdp_automation::scheduler::{
    IntervalUnit, NewSchedule, ScheduleConfig, ScheduleService, ScheduleTask, SchedulerConfig,
    SchedulerWorker, TaskExecutor, TestSuiteDeployTask,
};
use cdp_automation::store::memory::{MemoryLeaseStore, MemoryScheduleStore, MemoryTestRunStore};
use cdp_automation::store::ScheduleStore;
use cdp_events::UserDetails;
use cdp_id::WorkerId;
use chrono::{DateTime, Duration, TimeZone, Utc};

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, h, m, 0).unwrap()
}

fn suite_task() -> ScheduleTask {
    ScheduleTask::TestSuiteDeploy(TestSuiteDeployTask {
        entity_id: "nightly-e2e".into(),
        environment: "test".into(),
        cpu: 2048,
        memory: 4096,
        profile: Some("full".into()),
    })
}

struct Cluster {
    schedules: Arc<MemoryScheduleStore>,
    test_runs: Arc<MemoryTestRunStore>,
    ops: Arc<RecordingOps>,
    service: ScheduleService,
    workers: Vec<Arc<SchedulerWorker>>,
}

fn cluster(instances: usize) -> Cluster {
    let schedules = Arc::new(MemoryScheduleStore::new());
    let test_runs = Arc::new(MemoryTestRunStore::new());
    let ops = Arc::new(RecordingOps::new());
    let leases = MemoryLeaseStore::new();

    let workers = (0..instances)
        .map(|_| {
            Arc::new(SchedulerWorker::new(
                schedules.clone(),
                Arc::new(leases.for_holder(WorkerId::new())),
                TaskExecutor::new(ops.clone(), test_runs.clone()),
                SchedulerConfig::default(),
            ))
        })
        .collect();

    Cluster {
        service: ScheduleService::new(schedules.clone()),
        schedules,
        test_runs,
        ops,
        workers,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_instances_run_each_occurrence_once() {
    common::init_tracing();
    let cluster = cluster(4);
    cluster
        .service
        .create(
            NewSchedule {
                config: ScheduleConfig::Interval {
                    value: 15,
                    unit: IntervalUnit::Minutes,
                },
                task: suite_task(),
                start_date: None,
                end_date: None,
                owner: UserDetails::system(),
                enabled: true,
            },
            at(9, 50),
        )
        .await
        .unwrap();

    let passes: Vec<_> = cluster
        .workers
        .iter()
        .map(|worker| {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run_pass(at(10, 1)).await.unwrap() })
        })
        .collect();
    let mut executed = 0;
    for pass in passes {
        executed += pass.await.unwrap().executed;
    }

    assert_eq!(executed, 1);
    assert_eq!(cluster.ops.test_suite_calls().len(), 1);
    assert_eq!(cluster.ops.test_suite_calls()[0].profile.as_deref(), Some("full"));
    assert_eq!(cluster.test_runs.records().len(), 1);

    let schedule = &cluster.service.list_for_entity("nightly-e2e").await.unwrap()[0];
    assert_eq!(schedule.next_run_at, Some(at(10, 15)));
}

#[tokio::test]
async fn missed_occurrences_are_skipped_not_replayed() {
    let cluster = cluster(1);
    let schedule = cluster
        .service
        .create(
            NewSchedule {
                config: ScheduleConfig::Interval {
                    value: 1,
                    unit: IntervalUnit::Hours,
                },
                task: suite_task(),
                start_date: None,
                end_date: None,
                owner: UserDetails::system(),
                enabled: true,
            },
            at(8, 30),
        )
        .await
        .unwrap();
    assert_eq!(schedule.next_run_at, Some(at(9, 0)));

    // The service was down from 08:59 to 11:20.
    let stats = cluster.workers[0].run_pass(at(11, 20)).await.unwrap();

    assert_eq!(stats.skipped_stale, 1);
    assert!(cluster.ops.calls().is_empty());
    let stored = cluster.service.get(schedule.id).await.unwrap();
    assert_eq!(stored.next_run_at, Some(at(12, 0)));
}

#[tokio::test]
async fn once_schedule_fires_then_exhausts() {
    let cluster = cluster(1);
    let schedule = cluster
        .service
        .create(
            NewSchedule {
                config: ScheduleConfig::Once { run_at: at(14, 0) },
                task: suite_task(),
                start_date: None,
                end_date: None,
                owner: UserDetails::system(),
                enabled: true,
            },
            at(13, 0),
        )
        .await
        .unwrap();

    let first = cluster.workers[0]
        .run_pass(at(14, 0) + Duration::seconds(20))
        .await
        .unwrap();
    assert_eq!(first.executed, 1);

    let stored = cluster.service.get(schedule.id).await.unwrap();
    assert!(stored.is_exhausted());
    let later = cluster.workers[0].run_pass(at(18, 0)).await.unwrap();
    assert_eq!(later.due, 0);
    assert_eq!(cluster.ops.test_suite_calls().len(), 1);
    assert_eq!(cluster.schedules.fetch_due(at(23, 0)).await.unwrap().len(), 0);
}

#[tokio::test]
async fn disabled_schedule_is_not_due() {
    let cluster = cluster(1);
    let mut new = NewSchedule {
        config: ScheduleConfig::Cron {
            expression: "*/5 * * * *".into(),
        },
        task: suite_task(),
        start_date: None,
        end_date: None,
        owner: UserDetails::system(),
        enabled: false,
    };
    cluster.service.create(new.clone(), at(10, 0)).await.unwrap();
    new.enabled = true;
    cluster.service.create(new, at(10, 0)).await.unwrap();

    let stats = cluster.workers[0].run_pass(at(10, 5)).await.unwrap();
    assert_eq!(stats.due, 1);
    assert_eq!(stats.executed, 1);
}
