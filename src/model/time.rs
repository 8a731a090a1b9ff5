//! ISO-8601 durations, IANA timezones and time-part names.
//!
//! `Duration` only models the calendar components the algebra needs
//! (`P1Y2M3DT4H5M6S` and the week-only `P2W`). Flooring and shifting are
//! performed in the wall-clock time of a `Timezone`, so `P1D` in
//! `America/Los_Angeles` floors to local midnight, not UTC midnight.

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, Months, NaiveDate, NaiveDateTime, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("Invalid ISO-8601 duration: {0}")]
    InvalidDuration(String),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("Unknown time part: {0}")]
    InvalidTimePart(String),
}

// ============================================================================
// Duration
// ============================================================================

/// A calendar duration such as `PT1H` or `P1Y1M1DT1H1M1S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Duration {
    pub years: u32,
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

/// One non-zero component of a duration, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurationUnit {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl DurationUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationUnit::Year => "year",
            DurationUnit::Month => "month",
            DurationUnit::Week => "week",
            DurationUnit::Day => "day",
            DurationUnit::Hour => "hour",
            DurationUnit::Minute => "minute",
            DurationUnit::Second => "second",
        }
    }
}

impl Duration {
    pub fn parse(s: &str) -> Result<Duration, TimeError> {
        let invalid = || TimeError::InvalidDuration(s.to_string());
        let body = s.strip_prefix('P').ok_or_else(invalid)?;
        if body.is_empty() {
            return Err(invalid());
        }

        let mut d = Duration::default();
        let mut in_time = false;
        let mut digits = String::new();
        for c in body.chars() {
            match c {
                'T' if !in_time && digits.is_empty() => in_time = true,
                '0'..='9' => digits.push(c),
                unit => {
                    let n: u32 = digits.parse().map_err(|_| invalid())?;
                    digits.clear();
                    match (in_time, unit) {
                        (false, 'Y') => d.years = n,
                        (false, 'M') => d.months = n,
                        (false, 'W') => d.weeks = n,
                        (false, 'D') => d.days = n,
                        (true, 'H') => d.hours = n,
                        (true, 'M') => d.minutes = n,
                        (true, 'S') => d.seconds = n,
                        _ => return Err(invalid()),
                    }
                }
            }
        }
        if !digits.is_empty() || d == Duration::default() {
            return Err(invalid());
        }
        if d.weeks > 0 && d.components().len() > 1 {
            return Err(invalid());
        }
        Ok(d)
    }

    /// Non-zero components from largest to smallest unit.
    pub fn components(&self) -> Vec<(DurationUnit, u32)> {
        [
            (DurationUnit::Year, self.years),
            (DurationUnit::Month, self.months),
            (DurationUnit::Week, self.weeks),
            (DurationUnit::Day, self.days),
            (DurationUnit::Hour, self.hours),
            (DurationUnit::Minute, self.minutes),
            (DurationUnit::Second, self.seconds),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .collect()
    }

    /// The only component of a single-unit duration (`PT5M` → minute, 5).
    pub fn single_unit(&self) -> Option<(DurationUnit, u32)> {
        match self.components().as_slice() {
            [one] => Some(*one),
            _ => None,
        }
    }

    /// Whether buckets of this width tile their parent unit evenly.
    pub fn is_floorable(&self) -> bool {
        match self.single_unit() {
            Some((DurationUnit::Second, n)) | Some((DurationUnit::Minute, n)) => 60 % n == 0,
            Some((DurationUnit::Hour, n)) => 24 % n == 0,
            Some((DurationUnit::Month, n)) => 12 % n == 0,
            Some((DurationUnit::Day, 1)) | Some((DurationUnit::Week, 1)) => true,
            Some((DurationUnit::Year, _)) => true,
            _ => false,
        }
    }

    /// Floor `t` to the start of its bucket in `tz` wall-clock time.
    pub fn floor(&self, t: DateTime<Utc>, tz: &Timezone) -> Option<DateTime<Utc>> {
        let (unit, n) = self.single_unit()?;
        let local = t.with_timezone(&tz.tz).naive_local();
        let date = local.date();
        let floored: NaiveDateTime = match unit {
            DurationUnit::Second => {
                date.and_hms_opt(local.hour(), local.minute(), local.second() / n * n)?
            }
            DurationUnit::Minute => date.and_hms_opt(local.hour(), local.minute() / n * n, 0)?,
            DurationUnit::Hour => date.and_hms_opt(local.hour() / n * n, 0, 0)?,
            DurationUnit::Day => date.and_hms_opt(0, 0, 0)?,
            DurationUnit::Week => {
                let back = date.weekday().num_days_from_monday() as i64;
                (date - ChronoDuration::days(back)).and_hms_opt(0, 0, 0)?
            }
            DurationUnit::Month => {
                let month0 = (date.month() - 1) / n * n;
                NaiveDate::from_ymd_opt(date.year(), month0 + 1, 1)?.and_hms_opt(0, 0, 0)?
            }
            DurationUnit::Year => {
                let year = date.year().div_euclid(n as i32) * n as i32;
                NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)?
            }
        };
        tz.tz
            .from_local_datetime(&floored)
            .earliest()
            .map(|d| d.with_timezone(&Utc))
    }

    /// Move `t` by `step` multiples of this duration in `tz` wall-clock time.
    pub fn shift(&self, t: DateTime<Utc>, tz: &Timezone, step: i32) -> Option<DateTime<Utc>> {
        let mut local = t.with_timezone(&tz.tz).naive_local();
        let months = (self.years * 12 + self.months) as i64 * step as i64;
        local = if months >= 0 {
            local.checked_add_months(Months::new(months as u32))?
        } else {
            local.checked_sub_months(Months::new((-months) as u32))?
        };
        let step = step as i64;
        local += ChronoDuration::weeks(self.weeks as i64 * step)
            + ChronoDuration::days(self.days as i64 * step)
            + ChronoDuration::hours(self.hours as i64 * step)
            + ChronoDuration::minutes(self.minutes as i64 * step)
            + ChronoDuration::seconds(self.seconds as i64 * step);
        tz.tz
            .from_local_datetime(&local)
            .earliest()
            .map(|d| d.with_timezone(&Utc))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("P")?;
        if self.weeks > 0 {
            return write!(f, "{}W", self.weeks);
        }
        for (n, u) in [(self.years, 'Y'), (self.months, 'M'), (self.days, 'D')] {
            if n > 0 {
                write!(f, "{}{}", n, u)?;
            }
        }
        if self.hours + self.minutes + self.seconds > 0 {
            f.write_str("T")?;
            for (n, u) in [(self.hours, 'H'), (self.minutes, 'M'), (self.seconds, 'S')] {
                if n > 0 {
                    write!(f, "{}{}", n, u)?;
                }
            }
        }
        Ok(())
    }
}

impl FromStr for Duration {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Duration::parse(s)
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Duration::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Timezone
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timezone {
    tz: Tz,
}

impl Timezone {
    pub fn utc() -> Self {
        Self { tz: Tz::Etc__UTC }
    }

    pub fn parse(name: &str) -> Result<Timezone, TimeError> {
        name.parse::<Tz>()
            .map(|tz| Timezone { tz })
            .map_err(|_| TimeError::InvalidTimezone(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        self.tz.name()
    }

    pub fn is_utc(&self) -> bool {
        matches!(self.tz, Tz::Etc__UTC | Tz::UTC | Tz::Etc__GMT | Tz::GMT | Tz::Etc__Universal)
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Self::utc()
    }
}

impl fmt::Display for Timezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Timezone {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Timezone {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timezone::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TimePart
// ============================================================================

/// A calendar field extracted from a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimePart {
    SecondOfMinute,
    SecondOfHour,
    SecondOfDay,
    SecondOfWeek,
    SecondOfMonth,
    SecondOfYear,
    MinuteOfHour,
    MinuteOfDay,
    MinuteOfWeek,
    MinuteOfMonth,
    MinuteOfYear,
    HourOfDay,
    HourOfWeek,
    HourOfMonth,
    HourOfYear,
    DayOfWeek,
    DayOfMonth,
    DayOfYear,
    WeekOfMonth,
    WeekOfYear,
    MonthOfYear,
    Quarter,
    Year,
}

impl TimePart {
    pub const ALL: [TimePart; 23] = [
        TimePart::SecondOfMinute,
        TimePart::SecondOfHour,
        TimePart::SecondOfDay,
        TimePart::SecondOfWeek,
        TimePart::SecondOfMonth,
        TimePart::SecondOfYear,
        TimePart::MinuteOfHour,
        TimePart::MinuteOfDay,
        TimePart::MinuteOfWeek,
        TimePart::MinuteOfMonth,
        TimePart::MinuteOfYear,
        TimePart::HourOfDay,
        TimePart::HourOfWeek,
        TimePart::HourOfMonth,
        TimePart::HourOfYear,
        TimePart::DayOfWeek,
        TimePart::DayOfMonth,
        TimePart::DayOfYear,
        TimePart::WeekOfMonth,
        TimePart::WeekOfYear,
        TimePart::MonthOfYear,
        TimePart::Quarter,
        TimePart::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimePart::SecondOfMinute => "SECOND_OF_MINUTE",
            TimePart::SecondOfHour => "SECOND_OF_HOUR",
            TimePart::SecondOfDay => "SECOND_OF_DAY",
            TimePart::SecondOfWeek => "SECOND_OF_WEEK",
            TimePart::SecondOfMonth => "SECOND_OF_MONTH",
            TimePart::SecondOfYear => "SECOND_OF_YEAR",
            TimePart::MinuteOfHour => "MINUTE_OF_HOUR",
            TimePart::MinuteOfDay => "MINUTE_OF_DAY",
            TimePart::MinuteOfWeek => "MINUTE_OF_WEEK",
            TimePart::MinuteOfMonth => "MINUTE_OF_MONTH",
            TimePart::MinuteOfYear => "MINUTE_OF_YEAR",
            TimePart::HourOfDay => "HOUR_OF_DAY",
            TimePart::HourOfWeek => "HOUR_OF_WEEK",
            TimePart::HourOfMonth => "HOUR_OF_MONTH",
            TimePart::HourOfYear => "HOUR_OF_YEAR",
            TimePart::DayOfWeek => "DAY_OF_WEEK",
            TimePart::DayOfMonth => "DAY_OF_MONTH",
            TimePart::DayOfYear => "DAY_OF_YEAR",
            TimePart::WeekOfMonth => "WEEK_OF_MONTH",
            TimePart::WeekOfYear => "WEEK_OF_YEAR",
            TimePart::MonthOfYear => "MONTH_OF_YEAR",
            TimePart::Quarter => "QUARTER",
            TimePart::Year => "YEAR",
        }
    }

    /// Upper bound on distinct values, `None` for unbounded parts.
    pub fn cardinality(&self) -> Option<u32> {
        match self {
            TimePart::SecondOfMinute | TimePart::MinuteOfHour => Some(60),
            TimePart::SecondOfHour => Some(3600),
            TimePart::MinuteOfDay => Some(1440),
            TimePart::HourOfDay => Some(24),
            TimePart::HourOfWeek => Some(168),
            TimePart::HourOfMonth => Some(744),
            TimePart::DayOfWeek => Some(7),
            TimePart::DayOfMonth => Some(31),
            TimePart::DayOfYear => Some(366),
            TimePart::WeekOfMonth => Some(5),
            TimePart::WeekOfYear => Some(53),
            TimePart::MonthOfYear => Some(12),
            TimePart::Quarter => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for TimePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimePart {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimePart::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| TimeError::InvalidTimePart(s.to_string()))
    }
}
