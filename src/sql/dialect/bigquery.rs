//! BigQuery SQL dialect.
//!
//! BigQuery features:
//! - Backtick identifier quoting
//! - Backslash escapes in string literals
//! - `TIMESTAMP_TRUNC(t, UNIT, 'tz')` floors in wall-clock time natively
//! - `DATETIME_ADD` for shifts (`TIMESTAMP_ADD` rejects MONTH and YEAR)
//! - `EXTRACT(DAYOFWEEK ...)` counts from Sunday = 1

use chrono::{DateTime, Utc};

use super::helpers;
use super::template::DialectTables;
use super::{DialectError, SqlDialect};
use crate::model::{Duration, DurationUnit, PlyType, TimePart, Timezone};

/// BigQuery SQL dialect.
#[derive(Debug, Clone)]
pub struct BigQuery {
    tables: DialectTables,
}

impl BigQuery {
    pub fn new() -> Self {
        Self {
            tables: default_tables().expect("built-in tables are valid"),
        }
    }

    pub fn with_tables(tables: DialectTables) -> Self {
        Self { tables }
    }
}

impl Default for BigQuery {
    fn default() -> Self {
        Self::new()
    }
}

// ISO day of week (Monday = 0) from BigQuery's Sunday-based numbering.
const ISO_DOW0: &str = "MOD(EXTRACT(DAYOFWEEK FROM $$) + 5, 7)";

pub fn default_tables() -> Result<DialectTables, super::TemplateError> {
    use PlyType::*;
    use TimePart::*;

    let hour_of_week = format!("({} * 24 + EXTRACT(HOUR FROM $$))", ISO_DOW0);
    let minute_of_week = format!("({} * 60 + EXTRACT(MINUTE FROM $$))", hour_of_week);
    let second_of_week = format!("({} * 60 + EXTRACT(SECOND FROM $$))", minute_of_week);

    DialectTables::builder()
        .bucket("PT1S", "SECOND")
        .bucket("PT1M", "MINUTE")
        .bucket("PT1H", "HOUR")
        .bucket("P1D", "DAY")
        .bucket("P1W", "WEEK(MONDAY)")
        .bucket("P1M", "MONTH")
        .bucket("P1Y", "YEAR")
        .cast(Time, Number, "TIMESTAMP_MILLIS(CAST($$ AS INT64))")
        .cast(Time, String, "SAFE_CAST($$ AS TIMESTAMP)")
        .cast(Number, Time, "UNIX_MILLIS($$)")
        .cast(Number, String, "SAFE_CAST($$ AS FLOAT64)")
        .cast(String, Number, "CAST($$ AS STRING)")
        .cast(String, Time, "FORMAT_TIMESTAMP('%Y-%m-%dT%H:%M:%E3SZ', $$)")
        .time_part(SecondOfMinute, "EXTRACT(SECOND FROM $$)")
        .time_part(SecondOfHour, "(EXTRACT(MINUTE FROM $$) * 60 + EXTRACT(SECOND FROM $$))")
        .time_part(
            SecondOfDay,
            "((EXTRACT(HOUR FROM $$) * 60 + EXTRACT(MINUTE FROM $$)) * 60 + EXTRACT(SECOND FROM $$))",
        )
        .time_part(SecondOfWeek, &second_of_week)
        .time_part(MinuteOfHour, "EXTRACT(MINUTE FROM $$)")
        .time_part(MinuteOfDay, "(EXTRACT(HOUR FROM $$) * 60 + EXTRACT(MINUTE FROM $$))")
        .time_part(MinuteOfWeek, &minute_of_week)
        .time_part(HourOfDay, "EXTRACT(HOUR FROM $$)")
        .time_part(HourOfWeek, &hour_of_week)
        .time_part(HourOfMonth, "((EXTRACT(DAY FROM $$) - 1) * 24 + EXTRACT(HOUR FROM $$))")
        .time_part(HourOfYear, "((EXTRACT(DAYOFYEAR FROM $$) - 1) * 24 + EXTRACT(HOUR FROM $$))")
        .time_part(DayOfWeek, &format!("({} + 1)", ISO_DOW0))
        .time_part(DayOfMonth, "EXTRACT(DAY FROM $$)")
        .time_part(DayOfYear, "EXTRACT(DAYOFYEAR FROM $$)")
        .time_part(WeekOfYear, "EXTRACT(ISOWEEK FROM $$)")
        .time_part(MonthOfYear, "EXTRACT(MONTH FROM $$)")
        .time_part(Quarter, "EXTRACT(QUARTER FROM $$)")
        .time_part(Year, "EXTRACT(YEAR FROM $$)")
        .build()
}

fn unit_keyword(unit: DurationUnit) -> &'static str {
    match unit {
        DurationUnit::Year => "YEAR",
        DurationUnit::Month => "MONTH",
        DurationUnit::Week => "WEEK",
        DurationUnit::Day => "DAY",
        DurationUnit::Hour => "HOUR",
        DurationUnit::Minute => "MINUTE",
        DurationUnit::Second => "SECOND",
    }
}

impl SqlDialect for BigQuery {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn tables(&self) -> &DialectTables {
        &self.tables
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_backslash(s)
    }

    fn time_to_sql(&self, date: Option<&DateTime<Utc>>) -> String {
        match date {
            Some(d) => format!("TIMESTAMP('{}')", helpers::iso_timestamp(d)),
            None => self.format_null().to_string(),
        }
    }

    fn utc_to_walltime(&self, operand: &str, timezone: &Timezone) -> String {
        if timezone.is_utc() {
            operand.to_string()
        } else {
            format!("DATETIME({}, '{}')", operand, timezone.name())
        }
    }

    fn walltime_to_utc(&self, operand: &str, timezone: &Timezone) -> String {
        if timezone.is_utc() {
            operand.to_string()
        } else {
            format!("TIMESTAMP({}, '{}')", operand, timezone.name())
        }
    }

    fn bucket_call(&self, operand: &str, spec: &str) -> String {
        format!("TIMESTAMP_TRUNC({}, {})", operand, spec)
    }

    fn time_floor_expression(
        &self,
        operand: &str,
        duration: &Duration,
        timezone: &Timezone,
    ) -> Result<String, DialectError> {
        let spec = self
            .tables()
            .bucket(duration)
            .ok_or_else(|| DialectError::UnsupportedDuration(duration.to_string()))?;
        if timezone.is_utc() {
            Ok(self.bucket_call(operand, spec))
        } else {
            Ok(format!(
                "TIMESTAMP_TRUNC({}, {}, '{}')",
                operand,
                spec,
                timezone.name()
            ))
        }
    }

    fn add_interval(&self, operand: &str, unit: DurationUnit, amount: u64, negative: bool) -> String {
        let func = if negative { "DATETIME_SUB" } else { "DATETIME_ADD" };
        format!("{}({}, INTERVAL {} {})", func, operand, amount, unit_keyword(unit))
    }

    fn extract_expression(&self, operand: &str, regexp: &str) -> String {
        format!("REGEXP_EXTRACT({}, {})", operand, self.quote_string(regexp))
    }

    fn regexp_expression(&self, operand: &str, regexp: &str) -> String {
        format!("REGEXP_CONTAINS({}, {})", operand, self.quote_string(regexp))
    }
}
