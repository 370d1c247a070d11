//! Recurrence rules and next-run computation.
//!
//! Every [`ScheduleConfig`] is reduced to a cron expression in the `cron`
//! crate's syntax (seconds first, optional year, UTC). The expression is what
//! the scheduler evaluates; the config is kept so the rule can be shown and
//! edited in its original form.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc, Weekday};
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DbError;

/// Unit of an [`ScheduleConfig::Interval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    /// Largest value that still divides the unit's cron field evenly enough to be meaningful.
    const fn max_value(self) -> u32 {
        match self {
            IntervalUnit::Minutes => 59,
            IntervalUnit::Hours => 23,
            IntervalUnit::Days => 31,
        }
    }
}

/// How often a schedule fires. All times are UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleConfig {
    Once { run_at: DateTime<Utc> },
    Daily { time: NaiveTime },
    Weekly { time: NaiveTime, days_of_week: Vec<Weekday> },
    Interval { value: u32, unit: IntervalUnit },
    /// A raw cron expression; 5-field expressions get a zero seconds field.
    Cron { expression: String },
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid recurrence: {0}")]
    InvalidRecurrence(String),

    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("schedule not found: {0}")]
    NotFound(cdp_id::ScheduleId),

    #[error("database error: {0}")]
    Db(#[from] DbError),
}

impl ScheduleConfig {
    /// Derives the cron expression evaluated by the scheduler.
    pub fn to_cron(&self) -> Result<String, ScheduleError> {
        let expression = match self {
            ScheduleConfig::Once { run_at } => format!(
                "{} {} {} {} {} * {}",
                run_at.second(),
                run_at.minute(),
                run_at.hour(),
                run_at.day(),
                run_at.month(),
                run_at.year()
            ),
            ScheduleConfig::Daily { time } => {
                format!("{} {} {} * * *", time.second(), time.minute(), time.hour())
            }
            ScheduleConfig::Weekly { time, days_of_week } => {
                if days_of_week.is_empty() {
                    return Err(ScheduleError::InvalidRecurrence(
                        "weekly schedule needs at least one day".to_string(),
                    ));
                }
                let days: BTreeSet<u32> = days_of_week
                    .iter()
                    .map(Weekday::num_days_from_monday)
                    .collect();
                let days = days
                    .into_iter()
                    .map(day_name)
                    .collect::<Vec<_>>()
                    .join(",");
                format!(
                    "{} {} {} * * {}",
                    time.second(),
                    time.minute(),
                    time.hour(),
                    days
                )
            }
            ScheduleConfig::Interval { value, unit } => {
                if *value == 0 || *value > unit.max_value() {
                    return Err(ScheduleError::InvalidRecurrence(format!(
                        "interval must be between 1 and {} {unit:?}",
                        unit.max_value()
                    )));
                }
                match unit {
                    IntervalUnit::Minutes => format!("0 */{value} * * * *"),
                    IntervalUnit::Hours => format!("0 0 */{value} * * *"),
                    IntervalUnit::Days => format!("0 0 0 */{value} * *"),
                }
            }
            ScheduleConfig::Cron { expression } => normalize_cron(expression)?,
        };

        parse_cron(&expression)?;
        Ok(expression)
    }
}

fn day_name(days_from_monday: u32) -> &'static str {
    match days_from_monday {
        0 => "MON",
        1 => "TUE",
        2 => "WED",
        3 => "THU",
        4 => "FRI",
        5 => "SAT",
        _ => "SUN",
    }
}

/// Brings a 5-field (minute-first) expression to the 6-field form.
///
/// 6- and 7-field expressions pass through unchanged.
pub fn normalize_cron(expression: &str) -> Result<String, ScheduleError> {
    let expression = expression.trim();
    match expression.split_whitespace().count() {
        5 => Ok(format!("0 {expression}")),
        6 | 7 => Ok(expression.to_string()),
        n => Err(ScheduleError::InvalidCron {
            expression: expression.to_string(),
            reason: format!("expected 5, 6 or 7 fields, got {n}"),
        }),
    }
}

fn parse_cron(expression: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expression).map_err(|e| ScheduleError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// The first occurrence of `cron_expression` strictly after `from`.
///
/// Returns `None` when there is no further occurrence or it falls after `end_date`.
pub fn recalc(
    cron_expression: &str,
    from: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let schedule = parse_cron(cron_expression)?;
    Ok(schedule
        .after(&from)
        .next()
        .filter(|next| end_date.is_none_or(|end| *next <= end)))
}
