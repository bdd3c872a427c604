//! Schedule triggers: five-field cron expressions and fixed intervals.
//!
//! All times are UTC. A trigger is validated when it is built, so a
//! [`Trigger`] value is always able to produce a next fire time.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Search horizon for cron matches. Eight years always contains a Feb 29.
const MAX_SEARCH_DAYS: u32 = 366 * 8;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Trigger settings as supplied by callers and as persisted.
///
/// Either `cron_expression` or at least one `interval_*` key must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_days: Option<u64>,
}

impl ScheduleConfig {
    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            cron_expression: Some(expression.into()),
            ..Self::default()
        }
    }

    fn has_interval(&self) -> bool {
        self.interval_seconds.is_some()
            || self.interval_minutes.is_some()
            || self.interval_hours.is_some()
            || self.interval_days.is_some()
    }
}

/// When a scheduled job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ScheduleConfig", into = "ScheduleConfig")]
pub enum Trigger {
    Cron(CronSchedule),
    /// Fires every `days*86400 + hours*3600 + minutes*60 + seconds` seconds.
    Interval {
        seconds: Option<u64>,
        minutes: Option<u64>,
        hours: Option<u64>,
        days: Option<u64>,
    },
}

impl Trigger {
    /// Validates a schedule configuration and builds the trigger it describes.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when both or neither kinds are given, the cron
    /// expression is empty or malformed, or the interval adds up to zero.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        match (&config.cron_expression, config.has_interval()) {
            (Some(_), true) => Err(Error::validation(
                "give either cron_expression or interval values, not both",
            )),
            (None, false) => Err(Error::validation(
                "a cron_expression or at least one interval value is required",
            )),
            (Some(expression), false) => Ok(Trigger::Cron(expression.parse()?)),
            (None, true) => {
                let trigger = Trigger::Interval {
                    seconds: config.interval_seconds,
                    minutes: config.interval_minutes,
                    hours: config.interval_hours,
                    days: config.interval_days,
                };
                match trigger.interval_seconds() {
                    Some(0) => Err(Error::validation("interval must be longer than zero")),
                    Some(_) => Ok(trigger),
                    None => Err(Error::validation("interval is too long")),
                }
            }
        }
    }

    pub fn to_config(&self) -> ScheduleConfig {
        match self {
            Trigger::Cron(schedule) => ScheduleConfig::cron(schedule.expression()),
            Trigger::Interval {
                seconds,
                minutes,
                hours,
                days,
            } => ScheduleConfig {
                cron_expression: None,
                interval_seconds: *seconds,
                interval_minutes: *minutes,
                interval_hours: *hours,
                interval_days: *days,
            },
        }
    }

    /// Total interval length, `None` for cron triggers or on overflow.
    pub fn interval_seconds(&self) -> Option<u64> {
        match self {
            Trigger::Cron(_) => None,
            Trigger::Interval {
                seconds,
                minutes,
                hours,
                days,
            } => days
                .unwrap_or(0)
                .checked_mul(86_400)?
                .checked_add(hours.unwrap_or(0).checked_mul(3_600)?)?
                .checked_add(minutes.unwrap_or(0).checked_mul(60)?)?
                .checked_add(seconds.unwrap_or(0)),
        }
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron(schedule) => schedule.next_after(after),
            Trigger::Interval { .. } => {
                let seconds = i64::try_from(self.interval_seconds()?).ok()?;
                after.checked_add_signed(Duration::try_seconds(seconds)?)
            }
        }
    }
}

impl TryFrom<ScheduleConfig> for Trigger {
    type Error = Error;

    fn try_from(config: ScheduleConfig) -> Result<Self> {
        Trigger::from_config(&config)
    }
}

impl From<Trigger> for ScheduleConfig {
    fn from(trigger: Trigger) -> Self {
        trigger.to_config()
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Cron(schedule) => write!(f, "cron '{}'", schedule.expression()),
            Trigger::Interval { .. } => {
                write!(f, "every {}s", self.interval_seconds().unwrap_or(0))
            }
        }
    }
}

/// A parsed five-field cron expression: minute, hour, day of month, month, day
/// of week.
///
/// Fields accept `*`, numbers, `a-b` ranges, `/n` steps and comma lists. Month
/// and weekday fields also accept English three-letter names. Weekday 0 and 7
/// are both Sunday. When day of month and day of week are both restricted, a
/// day matching either one fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    day_of_month_any: bool,
    day_of_week_any: bool,
}

impl CronSchedule {
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after
            .naive_utc()
            .with_second(0)?
            .with_nanosecond(0)?
            .checked_add_signed(Duration::minutes(1))?;
        let start_date = start.date();
        let mut date = start_date;

        for _ in 0..MAX_SEARCH_DAYS {
            if self.date_matches(date) {
                let first_day = date == start_date;
                let from_hour = if first_day { start.hour() } else { 0 };
                for hour in from_hour..24 {
                    if !has_bit(self.hours, hour) {
                        continue;
                    }
                    let from_minute = if first_day && hour == from_hour {
                        start.minute()
                    } else {
                        0
                    };
                    if let Some(minute) = (from_minute..60).find(|m| has_bit(self.minutes, *m)) {
                        let naive = date.and_hms_opt(hour, minute, 0)?;
                        return Some(Utc.from_utc_datetime(&naive));
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        if !has_bit(self.months, date.month()) {
            return false;
        }
        let dom = has_bit(self.days_of_month, date.day());
        let dow = has_bit(self.days_of_week, date.weekday().num_days_from_sunday());
        if self.day_of_month_any || self.day_of_week_any {
            dom && dow
        } else {
            dom || dow
        }
    }
}

impl FromStr for CronSchedule {
    type Err = Error;

    fn from_str(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(Error::validation("cron expression must not be empty"));
        }
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(Error::validation(format!(
                "cron expression '{}' must have 5 fields, found {}",
                expression,
                fields.len()
            )));
        };

        let mut days_of_week = parse_field(dow, 0, 7, Some(&WEEKDAY_NAMES))?;
        if has_bit(days_of_week, 7) {
            days_of_week = (days_of_week | 1) & !(1 << 7);
        }

        let schedule = CronSchedule {
            expression: fields.join(" "),
            minutes: parse_field(minute, 0, 59, None)?,
            hours: parse_field(hour, 0, 23, None)?,
            days_of_month: parse_field(dom, 1, 31, None)?,
            months: parse_field(month, 1, 12, Some(&MONTH_NAMES))?,
            days_of_week,
            day_of_month_any: dom.starts_with('*'),
            day_of_week_any: dow.starts_with('*'),
        };

        let reference = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single();
        if reference.and_then(|r| schedule.next_after(r)).is_none() {
            return Err(Error::validation(format!(
                "cron expression '{}' never matches a real date",
                expression
            )));
        }
        Ok(schedule)
    }
}

fn has_bit(set: u64, bit: u32) -> bool {
    bit < 64 && set & (1 << bit) != 0
}

/// Parses one cron field into a bit set of allowed values.
fn parse_field(field: &str, min: u32, max: u32, names: Option<&[&str]>) -> Result<u64> {
    let invalid = |reason: &str| {
        Error::validation(format!("invalid cron field '{}': {}", field, reason))
    };

    let mut set = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid("step is not a number"))?;
                if step == 0 {
                    return Err(invalid("step must be positive"));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, names, min)?, parse_value(b, names, min)?)
        } else {
            let value = parse_value(range, names, min)?;
            // "5/10" means from 5 to the end of the range in steps of 10.
            (value, if step.is_some() { max } else { value })
        };

        if start < min || end > max {
            return Err(invalid(&format!("values must be within {}-{}", min, max)));
        }
        if start > end {
            return Err(invalid("range start is after its end"));
        }

        let step = step.unwrap_or(1);
        let mut value = start;
        while value <= end {
            set |= 1 << value;
            match value.checked_add(step) {
                Some(next) => value = next,
                None => break,
            }
        }
    }
    Ok(set)
}

fn parse_value(token: &str, names: Option<&[&str]>, min: u32) -> Result<u32> {
    if let Ok(value) = token.parse::<u32>() {
        return Ok(value);
    }
    let lower = token.to_ascii_lowercase();
    names
        .and_then(|names| names.iter().position(|name| *name == lower))
        .map(|index| index as u32 + min)
        .ok_or_else(|| Error::validation(format!("invalid cron value '{}'", token)))
}
