//! Task definitions as clients send them, validated into storable tasks.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use lanwake_core::config::ScheduleClock;
use lanwake_core::error::{LanWakeError, Result};
use lanwake_core::types::{NewScheduledTask, Schedule, ScheduledTask, TargetType, TaskTarget};
use serde::{Deserialize, Serialize};

use crate::cron::CronSchedule;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Body of a task create request.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDraft {
    pub name: String,
    #[serde(default)]
    pub cron_expression: String,
    #[serde(default)]
    pub scheduled_time: String,
    pub target_type: TargetType,
    pub target_id: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl TaskDraft {
    pub fn validate(&self, clock: ScheduleClock) -> Result<NewScheduledTask> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(LanWakeError::validation("Task name must not be empty"));
        }
        Ok(NewScheduledTask {
            name: name.to_string(),
            enabled: self.enabled,
            target: TaskTarget {
                target_type: self.target_type,
                target_id: self.target_id,
            },
            schedule: parse_schedule(&self.cron_expression, &self.scheduled_time, clock)?,
        })
    }
}

/// Body of a task update request; absent fields keep their current value.
/// Switching schedule kind means sending the old one as an empty string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub cron_expression: Option<String>,
    pub scheduled_time: Option<String>,
    pub target_type: Option<TargetType>,
    pub target_id: Option<i64>,
    pub enabled: Option<bool>,
}

impl TaskPatch {
    pub fn apply(&self, current: &ScheduledTask, clock: ScheduleClock) -> Result<NewScheduledTask> {
        let (cron, scheduled) = match &current.schedule {
            Schedule::Cron(expr) => (expr.clone(), String::new()),
            Schedule::Once(at) => (String::new(), at.to_rfc3339()),
        };
        TaskDraft {
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            cron_expression: self.cron_expression.clone().unwrap_or(cron),
            scheduled_time: self.scheduled_time.clone().unwrap_or(scheduled),
            target_type: self.target_type.unwrap_or(current.target.target_type),
            target_id: self.target_id.unwrap_or(current.target.target_id),
            enabled: self.enabled.unwrap_or(current.enabled),
        }
        .validate(clock)
    }
}

/// Exactly one of `cron_expression` / `scheduled_time` must be non-empty.
pub fn parse_schedule(cron_expression: &str, scheduled_time: &str, clock: ScheduleClock) -> Result<Schedule> {
    match (cron_expression.trim(), scheduled_time.trim()) {
        ("", "") => Err(LanWakeError::validation(
            "Either cron_expression or scheduled_time is required",
        )),
        (cron, "") => Ok(Schedule::Cron(CronSchedule::parse(cron)?.expression().to_string())),
        ("", at) => Ok(Schedule::Once(parse_scheduled_time(at, clock)?)),
        _ => Err(LanWakeError::validation(
            "Set only one of cron_expression or scheduled_time",
        )),
    }
}

/// RFC 3339, or a naive `YYYY-MM-DD[T ]HH:MM[:SS]` read in the schedule clock.
pub fn parse_scheduled_time(raw: &str, clock: ScheduleClock) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| {
            LanWakeError::validation(format!(
                "Invalid scheduled_time '{raw}' (expected e.g. 2026-02-22T15:00)"
            ))
        })?;
    from_wall_clock(&naive, clock).ok_or_else(|| {
        LanWakeError::validation(format!("scheduled_time '{raw}' does not exist in local time"))
    })
}

/// `now` as seen on the schedule clock.
pub fn wall_clock(now: DateTime<Utc>, clock: ScheduleClock) -> NaiveDateTime {
    match clock {
        ScheduleClock::Local => now.with_timezone(&Local).naive_local(),
        ScheduleClock::Utc => now.naive_utc(),
    }
}

pub fn from_wall_clock(naive: &NaiveDateTime, clock: ScheduleClock) -> Option<DateTime<Utc>> {
    match clock {
        ScheduleClock::Local => Local
            .from_local_datetime(naive)
            .earliest()
            .map(|t| t.with_timezone(&Utc)),
        ScheduleClock::Utc => Some(Utc.from_utc_datetime(naive)),
    }
}

/// When the task will fire next, for display. `None` for disabled tasks,
/// spent one-offs and unparsable cron expressions.
pub fn next_run(task: &ScheduledTask, now: DateTime<Utc>, clock: ScheduleClock) -> Option<DateTime<Utc>> {
    if !task.enabled {
        return None;
    }
    match &task.schedule {
        Schedule::Once(at) => Some(*at),
        Schedule::Cron(expr) => {
            let cron = CronSchedule::parse(expr).ok()?;
            match clock {
                ScheduleClock::Local => cron
                    .next_after(&now.with_timezone(&Local))
                    .map(|t| t.with_timezone(&Utc)),
                ScheduleClock::Utc => cron.next_after(&now),
            }
        }
    }
}

/// A task as the API presents it.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: i64,
    pub name: String,
    pub cron_expression: String,
    pub scheduled_time: String,
    pub target_type: TargetType,
    pub target_id: i64,
    pub target_name: String,
    pub enabled: bool,
    pub last_fired: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskView {
    pub fn new(task: &ScheduledTask, target_name: Option<String>, next_run: Option<DateTime<Utc>>) -> Self {
        Self {
            id: task.id,
            name: task.name.clone(),
            cron_expression: task.schedule.cron_expression().unwrap_or_default().to_string(),
            scheduled_time: task
                .schedule
                .scheduled_time()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            target_type: task.target.target_type,
            target_id: task.target.target_id,
            target_name: target_name.unwrap_or_else(|| "(unknown)".into()),
            enabled: task.enabled,
            last_fired: task.last_fired,
            next_run,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}
