//! Recurrence expressions
//!
//! Accepted forms:
//! - standard 5-field cron: `min hour day-of-month month day-of-week`
//!   (day-of-week `0`-`6`, Sunday = 0, `7` also Sunday)
//! - 6/7-field cron with a leading seconds field (and optional year)
//! - shorthand macros: `@yearly`, `@annually`, `@monthly`, `@weekly`,
//!   `@daily`, `@midnight`, `@hourly`

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;

use aegis_common::{AegisError, AegisResult};

/// A validated recurrence, keeping the expression exactly as supplied.
#[derive(Debug, Clone)]
pub struct Recurrence {
    expression: String,
    schedule: CronSchedule,
}

impl Recurrence {
    pub fn parse(expression: &str) -> AegisResult<Self> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(AegisError::InvalidSchedule("expression must not be empty".into()));
        }
        let normalized = normalize(expression)?;
        let schedule = CronSchedule::from_str(&normalized)
            .map_err(|e| AegisError::InvalidSchedule(format!("'{expression}': {e}")))?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }
}

fn normalize(expression: &str) -> AegisResult<String> {
    if expression.starts_with('@') {
        let expanded = match expression.to_ascii_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 0 1 1 *",
            "@monthly" => "0 0 0 1 * *",
            "@weekly" => "0 0 0 * * Sun",
            "@daily" | "@midnight" => "0 0 0 * * *",
            "@hourly" => "0 0 * * * *",
            _ => {
                return Err(AegisError::InvalidSchedule(format!(
                    "unknown macro '{expression}'"
                )))
            }
        };
        return Ok(expanded.to_string());
    }

    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let dow = standard_day_of_week(fields[4])?;
            Ok(format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], fields[2], fields[3], dow
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(AegisError::InvalidSchedule(format!(
            "'{expression}' has {n} fields, expected 5, 6 or 7"
        ))),
    }
}

/// Translate standard day-of-week numbering (Sunday = 0 or 7) to the
/// one-based numbering used by the cron engine (Sunday = 1).
fn standard_day_of_week(field: &str) -> AegisResult<String> {
    let shift = |day: &str| -> AegisResult<String> {
        match day.parse::<u8>() {
            Ok(n) if n <= 7 => Ok(((n % 7) + 1).to_string()),
            Ok(n) => Err(AegisError::InvalidSchedule(format!(
                "day-of-week {n} out of range"
            ))),
            // names and `*` pass through untouched
            Err(_) => Ok(day.to_string()),
        }
    };

    let items = field
        .split(',')
        .map(|item| -> AegisResult<String> {
            let (base, step) = match item.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (item, None),
            };
            let base = match base.split_once('-') {
                // the engine has no day after Saturday, so spell these out
                Some((from, "7")) => return sunday_ending_range(from, step),
                Some((from, to)) => format!("{}-{}", shift(from)?, shift(to)?),
                None => shift(base)?,
            };
            Ok(match step {
                Some(step) => format!("{base}/{step}"),
                None => base,
            })
        })
        .collect::<AegisResult<Vec<String>>>()?;
    Ok(items.join(","))
}

/// Expand `from-7[/step]` into an explicit list of engine day numbers,
/// e.g. `5-7` (Friday through Sunday) becomes `6,7,1`.
fn sunday_ending_range(from: &str, step: Option<&str>) -> AegisResult<String> {
    let from: u8 = from.parse().map_err(|_| {
        AegisError::InvalidSchedule(format!("day-of-week range '{from}-7' must be numeric"))
    })?;
    let step: usize = match step {
        Some(step) => step
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| AegisError::InvalidSchedule(format!("invalid day-of-week step '{step}'")))?,
        None => 1,
    };

    let mut days: Vec<String> = Vec::new();
    for n in (from..=7).step_by(step) {
        let day = ((n % 7) + 1).to_string();
        if !days.contains(&day) {
            days.push(day);
        }
    }
    Ok(days.join(","))
}
