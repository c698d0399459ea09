//! Pure due-check predicate for scheduled tasks.

use crate::tasks::{ScheduleKind, ScheduledTask};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::str::FromStr;

/// Whether `task` should fire at `now`. Pure: no I/O, no mutation, stable
/// for repeated calls on the same inputs.
///
/// A cron task with no `last_run` reports due without consulting the
/// expression at all, so a malformed expression still fires once; from the
/// second evaluation on it is rejected. Interval and once tasks with
/// malformed values never fire.
pub fn is_due(task: &ScheduledTask, now: DateTime<Utc>) -> bool {
    match task.kind {
        ScheduleKind::Once => {
            if task.last_run.is_some() {
                return false;
            }
            match parse_utc(&task.value) {
                Some(target) => now >= target,
                None => {
                    tracing::warn!(task_id = %task.id, value = %task.value, "invalid once timestamp");
                    false
                }
            }
        }
        ScheduleKind::Interval => {
            let interval = match task.value.parse::<i64>() {
                Ok(seconds) if seconds > 0 => seconds,
                _ => {
                    tracing::warn!(task_id = %task.id, value = %task.value, "invalid interval");
                    return false;
                }
            };
            match task.last_run {
                None => true,
                Some(last) => (now - last).num_seconds() >= interval,
            }
        }
        ScheduleKind::Cron => {
            let Some(last) = task.last_run else {
                return true;
            };
            match parse_cron(&task.value) {
                Ok(schedule) => match schedule.after(&last).next() {
                    Some(next_run) => now >= next_run,
                    None => false,
                },
                Err(error) => {
                    tracing::warn!(task_id = %task.id, value = %task.value, %error, "invalid cron expression");
                    false
                }
            }
        }
    }
}

/// Parse a cron expression, accepting the common 5-field form by
/// prepending a seconds field of `0`.
pub fn parse_cron(expr: &str) -> Result<cron::Schedule, cron::error::Error> {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        cron::Schedule::from_str(&format!("0 {expr}"))
    } else {
        cron::Schedule::from_str(expr)
    }
}

/// Parse an ISO-8601 timestamp; naive timestamps are interpreted as UTC.
pub fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    value
        .parse::<NaiveDateTime>()
        .ok()
        .map(|naive| naive.and_utc())
}
