//! Crontab parsing on top of the `cron` crate.
//!
//! Input is classic 5-field crontab (`min hour dom mon dow`, Sunday = 0 or 7).
//! `@hourly`-style aliases are rejected. The `cron` crate wants a leading seconds
//! field and numbers weekdays 1-7 from Sunday, so numeric weekday items are
//! expanded and renumbered.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ::cron::Schedule;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("Cron expression must have exactly 5 fields, got {0}")]
    FieldCount(usize),

    #[error("Invalid day-of-week field '{0}'")]
    DayOfWeek(String),

    #[error("Invalid cron expression '{expr}': {reason}")]
    Parse { expr: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CronError>;

/// Parse a crontab expression into an evaluable schedule
pub fn parse(expr: &str) -> Result<Schedule> {
    let normalized = normalize(expr)?;
    Schedule::from_str(&normalized).map_err(|e| CronError::Parse {
        expr: expr.trim().to_string(),
        reason: e.to_string(),
    })
}

/// Check an expression without keeping the schedule
pub fn validate(expr: &str) -> Result<()> {
    parse(expr).map(|_| ())
}

/// First occurrence strictly after `after`
pub fn next_after(schedule: &Schedule, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(after).next()
}

/// Rewrite crontab syntax into the `cron` crate's seconds-first form
pub fn normalize(expr: &str) -> Result<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(CronError::FieldCount(fields.len()));
    }

    let day_of_week = normalize_day_of_week(fields[4])?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], day_of_week
    ))
}

fn normalize_day_of_week(field: &str) -> Result<String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let invalid = || CronError::DayOfWeek(field.to_string());
    let mut days = BTreeSet::new();
    let mut named = Vec::new();

    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (base, step)
            }
            None => (item, 1),
        };

        // Day names are understood by the cron crate directly
        if base.chars().any(|c| c.is_ascii_alphabetic()) {
            named.push(item.to_string());
            continue;
        }

        let (start, end) = match base {
            "*" => (0, 6),
            _ => match base.split_once('-') {
                Some((lo, hi)) => (parse_day(lo).ok_or_else(invalid)?, parse_day(hi).ok_or_else(invalid)?),
                None => {
                    let day = parse_day(base).ok_or_else(invalid)?;
                    // `n/step` runs to the end of the week
                    if item.contains('/') { (day, 6) } else { (day, day) }
                }
            },
        };
        if start > end {
            return Err(invalid());
        }

        for day in (start..=end).step_by(step as usize) {
            // 7 is Sunday too
            days.insert(day % 7);
        }
    }

    let mut parts: Vec<String> = days.into_iter().map(|day| (day + 1).to_string()).collect();
    parts.extend(named);
    if parts.is_empty() {
        return Err(invalid());
    }
    Ok(parts.join(","))
}

fn parse_day(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok().filter(|day| *day <= 7)
}
