//! Cron expression parser and matcher.
//! Format: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Per field: *, */N, N, A-B, A-B/N, N/S and comma lists of those.
//! Months and weekdays also accept names (jan..dec, sun..sat); weekday 7 is Sunday.
//! Example: "0 8 * * mon-fri" = weekdays at 8:00
//!
//! When both day-of-month and day-of-week are restricted, a day matches if
//! either does (classic cron semantics).

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use lanwake_core::error::{LanWakeError, Result};
use std::str::FromStr;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// How far ahead `next_after` searches (covers leap-day-only schedules).
const SEARCH_DAYS: i64 = 366 * 8;

/// Set of allowed values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }
}

struct FieldSpec {
    label: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Value of the first name (months start at 1, weekdays at 0).
    names_base: u32,
}

const MINUTE: FieldSpec = FieldSpec { label: "minute", min: 0, max: 59, names: &[], names_base: 0 };
const HOUR: FieldSpec = FieldSpec { label: "hour", min: 0, max: 23, names: &[], names_base: 0 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { label: "day-of-month", min: 1, max: 31, names: &[], names_base: 0 };
const MONTH: FieldSpec = FieldSpec { label: "month", min: 1, max: 12, names: &MONTH_NAMES, names_base: 1 };
// 7 is accepted and folded onto 0
const DAY_OF_WEEK: FieldSpec = FieldSpec { label: "day-of-week", min: 0, max: 7, names: &DAY_NAMES, names_base: 0 };

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(LanWakeError::validation(format!(
                "Invalid cron expression '{expression}': need 5 fields (MIN HOUR DOM MON DOW)"
            )));
        }

        let mut days_of_week = parse_field(parts[4], &DAY_OF_WEEK)?;
        if days_of_week.contains(7) {
            days_of_week = FieldSet((days_of_week.0 | 1) & !(1u64 << 7));
        }

        Ok(Self {
            expression: parts.join(" "),
            minutes: parse_field(parts[0], &MINUTE)?,
            hours: parse_field(parts[1], &HOUR)?,
            days_of_month: parse_field(parts[2], &DAY_OF_MONTH)?,
            months: parse_field(parts[3], &MONTH)?,
            days_of_week,
            dom_restricted: !parts[2].starts_with('*'),
            dow_restricted: !parts[4].starts_with('*'),
        })
    }

    /// Normalised source text.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        if !self.months.contains(date.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(date.day());
        let dow = self.days_of_week.contains(date.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// Does this wall-clock minute match? Seconds are ignored.
    pub fn matches(&self, at: &NaiveDateTime) -> bool {
        self.day_matches(at.date())
            && self.hours.contains(at.hour())
            && self.minutes.contains(at.minute())
    }

    /// First matching minute strictly after `after`, in `after`'s timezone.
    /// Local times skipped by a DST gap are passed over.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let start = after.naive_local().with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = start + Duration::days(SEARCH_DAYS);

        let mut candidate = start;
        while candidate < limit {
            let date = candidate.date();
            if !self.day_matches(date) {
                candidate = date.succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(candidate.hour()) {
                candidate = date.and_hms_opt(candidate.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if self.minutes.contains(candidate.minute())
                && let Some(found) = tz.from_local_datetime(&candidate).earliest()
            {
                return Some(found);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

impl FromStr for CronSchedule {
    type Err = LanWakeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Parse a cron expression and compute the next run time in UTC.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match CronSchedule::parse(expression) {
        Ok(schedule) => schedule.next_after(&after),
        Err(e) => {
            tracing::warn!("{e}");
            None
        }
    }
}

fn field_error(spec: &FieldSpec, item: &str, why: &str) -> LanWakeError {
    LanWakeError::validation(format!("Invalid cron {} field '{item}': {why}", spec.label))
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32> {
    let lower = raw.to_ascii_lowercase();
    if let Some(pos) = spec.names.iter().position(|n| *n == lower) {
        return Ok(pos as u32 + spec.names_base);
    }
    let n: u32 = raw
        .parse()
        .map_err(|_| field_error(spec, raw, "not a number"))?;
    if n < spec.min || n > spec.max {
        return Err(field_error(
            spec,
            raw,
            &format!("out of range {}-{}", spec.min, spec.max),
        ));
    }
    Ok(n)
}

/// Parse a cron field into the set of matching values.
fn parse_field(field: &str, spec: &FieldSpec) -> Result<FieldSet> {
    let mut bits = 0u64;
    for item in field.split(',') {
        if item.is_empty() {
            return Err(field_error(spec, field, "empty list item"));
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| field_error(spec, item, "bad step"))?;
                if step == 0 {
                    return Err(field_error(spec, item, "step must be positive"));
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (lo, hi) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            let (lo, hi) = (parse_value(a, spec)?, parse_value(b, spec)?);
            if lo > hi {
                return Err(field_error(spec, item, "range start after end"));
            }
            (lo, hi)
        } else {
            let n = parse_value(range, spec)?;
            // "N/S" runs from N to the end of the field
            if step > 1 { (n, spec.max) } else { (n, n) }
        };

        for v in (lo..=hi).step_by(step as usize) {
            bits |= 1u64 << v;
        }
    }
    Ok(FieldSet(bits))
}
