//! Cron expressions evaluated against the UTC clock.
//!
//! Accepts 6 fields (`sec min hour dom month dow`) or 5 fields
//! (`min hour dom month dow`, seconds fixed at 0).

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

use crate::types::{Error, Result};

/// Search horizon for `next_after`.
const HORIZON_YEARS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    restricted: bool,
}

impl Field {
    fn parse(spec: &str, min: u32, max: u32, name: &str) -> Result<Self> {
        let mut bits = 0u64;
        for part in spec.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| invalid(name, part, "step is not a number"))?;
                    if step == 0 {
                        return Err(invalid(name, part, "step must be positive"));
                    }
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                (number(a, name, part)?, number(b, name, part)?)
            } else {
                let start = number(range, name, part)?;
                (start, if step.is_some() { max } else { start })
            };

            if start < min || end > max || start > end {
                return Err(invalid(
                    name,
                    part,
                    &format!("expected values within {}-{}", min, max),
                ));
            }

            let step = step.unwrap_or(1);
            let mut value = start;
            while value <= end {
                bits |= 1 << value;
                value += step;
            }
        }

        Ok(Self {
            bits,
            restricted: !spec.starts_with('*'),
        })
    }

    /// Every value in `min..=max`.
    fn every(min: u32, max: u32) -> Self {
        let mut bits = 0u64;
        for value in min..=max {
            bits |= 1 << value;
        }
        Self {
            bits,
            restricted: false,
        }
    }

    fn matches(self, value: u32) -> bool {
        self.bits & (1 << value) != 0
    }
}

fn number(raw: &str, name: &str, part: &str) -> Result<u32> {
    raw.parse()
        .map_err(|_| invalid(name, part, "value is not a number"))
}

fn invalid(field: &str, part: &str, reason: &str) -> Error {
    Error::validation(format!("invalid cron {} field '{}': {}", field, part, reason))
}

/// Parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    seconds: Field,
    minutes: Field,
    hours: Field,
    days_of_month: Field,
    months: Field,
    days_of_week: Field,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let (sec, rest) = match fields.as_slice() {
            [sec, rest @ ..] if rest.len() == 5 => (*sec, rest),
            rest if rest.len() == 5 => ("0", rest),
            _ => {
                return Err(Error::validation(format!(
                    "cron expression '{}' must have 5 or 6 fields",
                    expr
                )))
            }
        };
        let [min, hour, dom, month, dow] = rest else {
            return Err(Error::validation(format!(
                "cron expression '{}' must have 5 or 6 fields",
                expr
            )));
        };

        let mut days_of_week = Field::parse(dow, 0, 7, "day-of-week")?;
        if days_of_week.matches(7) {
            days_of_week.bits = (days_of_week.bits & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: fields.join(" "),
            seconds: Field::parse(sec, 0, 59, "second")?,
            minutes: Field::parse(min, 0, 59, "minute")?,
            hours: Field::parse(hour, 0, 23, "hour")?,
            days_of_month: Field::parse(dom, 1, 31, "day-of-month")?,
            months: Field::parse(month, 1, 12, "month")?,
            days_of_week,
        })
    }

    /// Every minute at second 0.
    pub fn every_minute() -> Self {
        Self {
            source: "0 * * * * *".to_string(),
            seconds: Field {
                bits: 1,
                restricted: true,
            },
            minutes: Field::every(0, 59),
            hours: Field::every(0, 23),
            days_of_month: Field::every(1, 31),
            months: Field::every(1, 12),
            days_of_week: Field::every(0, 6),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom = self.days_of_month.matches(t.day());
        let dow = self.days_of_week.matches(t.weekday().num_days_from_sunday());
        if self.days_of_month.restricted && self.days_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First matching instant strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let limit = after.year() + HORIZON_YEARS;
        let mut t = after.with_nanosecond(0)? + Duration::seconds(1);

        loop {
            if t.year() > limit {
                return None;
            }
            if !self.months.matches(t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(&t) {
                t = t.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc();
                continue;
            }
            if !self.hours.matches(t.hour()) {
                t = t.with_minute(0)?.with_second(0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.matches(t.minute()) {
                t = t.with_second(0)? + Duration::minutes(1);
                continue;
            }
            if !self.seconds.matches(t.second()) {
                t += Duration::seconds(1);
                continue;
            }
            return Some(t);
        }
    }
}

impl FromStr for CronSchedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
