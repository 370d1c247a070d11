//! Concurrent confirmation events racing to link the same records.

mod common;

use std::sync::Arc;

use cdp_automation::correlation::{CorrelationConfig, Correlator};
use cdp_automation::store::memory::MemoryTestRunStore;
use cdp_automation::store::{MatchKeys, TestRun, TestRunStore};
use cdp_events::UserDetails;
use chrono::{Duration, Utc};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tasks_link_one_run_each() {
    common::init_tracing();
    let store = Arc::new(MemoryTestRunStore::new());
    let now = Utc::now();
    for offset in [30, 20, 10] {
        store
            .create(&TestRun::starting(
                "smoke",
                "dev",
                None,
                UserDetails::system(),
                now - Duration::seconds(offset),
            ))
            .await
            .unwrap();
    }

    let correlator = Arc::new(Correlator::new(
        store.clone() as Arc<dyn TestRunStore>,
        CorrelationConfig::default(),
    ));
    let keys = MatchKeys::new("smoke", "dev");

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let correlator = correlator.clone();
            let keys = keys.clone();
            tokio::spawn(async move {
                correlator
                    .link(&keys, &format!("task-{i}"), now)
                    .await
                    .unwrap()
                    .is_some()
            })
        })
        .collect();

    let mut linked = 0;
    for task in tasks {
        if task.await.unwrap() {
            linked += 1;
        }
    }

    assert_eq!(linked, 3, "one link per run, never two per run");
    let runs = store.records();
    let mut refs: Vec<_> = runs.iter().filter_map(|r| r.task_arn.clone()).collect();
    refs.sort();
    refs.dedup();
    assert_eq!(refs.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_reference_links_at_most_once() {
    let store = Arc::new(MemoryTestRunStore::new());
    let now = Utc::now();
    for _ in 0..4 {
        store
            .create(&TestRun::starting("smoke", "dev", None, UserDetails::system(), now))
            .await
            .unwrap();
    }
    let correlator = Arc::new(Correlator::new(
        store.clone() as Arc<dyn TestRunStore>,
        CorrelationConfig::default(),
    ));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .link(&MatchKeys::new("smoke", "dev"), "task-dup", now)
                    .await
                    .unwrap()
                    .is_some()
            })
        })
        .collect();

    let mut linked = 0;
    for task in tasks {
        if task.await.unwrap() {
            linked += 1;
        }
    }
    assert_eq!(linked, 1);
    assert_eq!(
        store.records().iter().filter(|r| r.task_arn.is_some()).count(),
        1
    );
}
