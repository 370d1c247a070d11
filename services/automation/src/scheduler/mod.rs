//! Scheduled automation.
//!
//! A schedule pairs a recurrence rule with a task. [`ScheduleService`] keeps
//! the derived cron expression and `next_run_at` in step with the rule;
//! [`SchedulerWorker`] polls for due schedules, runs their tasks under a
//! per-schedule lease and advances them to their next occurrence.

mod recurrence;
mod service;
mod task;
mod worker;

pub use recurrence::{normalize_cron, recalc, IntervalUnit, ScheduleConfig, ScheduleError};
pub use service::{NewSchedule, ScheduleService};
pub use task::{ScheduleTask, TaskError, TaskExecutor, TestSuiteDeployTask};
pub use worker::{PassStats, SchedulerConfig, SchedulerWorker};
