//! Presto / AWS Athena dialect.
//!
//! Athena features:
//! - Double-quote identifier quoting
//! - MySQL-compatible `DATE_FORMAT` patterns for bucketing
//! - `extract(FIELD from t)` for time parts (ISO day-of-week, Monday = 1)
//! - `DATE_ADD('unit', n, t)` for shifts, negated with a `-1 *` multiplier
//!
//! Wall-clock conversion is the identity here, so bucketing and time parts are
//! only exact for UTC-equivalent timezones.

use chrono::{DateTime, Utc};

use super::helpers;
use super::template::DialectTables;
use super::SqlDialect;
use crate::model::{DurationUnit, PlyType, TimePart, Timezone};

/// Presto SQL dialect (also used for Athena).
#[derive(Debug, Clone)]
pub struct Presto {
    tables: DialectTables,
}

impl Presto {
    pub fn new() -> Self {
        Self {
            tables: default_tables().expect("built-in tables are valid"),
        }
    }

    pub fn with_tables(tables: DialectTables) -> Self {
        Self { tables }
    }
}

impl Default for Presto {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_tables() -> Result<DialectTables, super::TemplateError> {
    use PlyType::*;
    use TimePart::*;

    DialectTables::builder()
        .bucket("PT1S", "%Y-%m-%d %H:%i:%SZ")
        .bucket("PT1M", "%Y-%m-%d %H:%i:00Z")
        .bucket("PT1H", "%Y-%m-%d %H:00:00Z")
        .bucket("P1D", "%Y-%m-%d 00:00:00Z")
        .bucket("P1M", "%Y-%m-01 00:00:00Z")
        .bucket("P1Y", "%Y-01-01 00:00:00Z")
        .cast(Time, Number, "FROM_UNIXTIME($$)")
        .cast(Number, Time, "cast(to_unixtime($$)*1000 as BIGINT)")
        .cast(Number, String, "cast($$ as BIGINT)")
        .cast(String, Number, "cast($$ as varchar)")
        .time_part(SecondOfMinute, "extract(SECOND from $$)")
        .time_part(SecondOfHour, "(extract(MINUTE from $$)*60+extract(SECOND from $$))")
        .time_part(
            SecondOfDay,
            "((extract(HOUR from $$)*60+extract(MINUTE from $$))*60+extract(SECOND from $$))",
        )
        .time_part(
            SecondOfWeek,
            "((((mod((extract(DAY_OF_WEEK from $$)+6), 7)*24)+extract(HOUR from $$))*60+extract(MINUTE from $$))*60+extract(SECOND from $$))",
        )
        .time_part(
            SecondOfMonth,
            "((((extract(DAY from $$)-1)*24+extract(HOUR from $$))*60+extract(MINUTE from $$))*60+extract(SECOND from $$))",
        )
        .time_part(
            SecondOfYear,
            "((((extract(DAY_OF_YEAR from $$)-1)*24+extract(HOUR from $$))*60+extract(MINUTE from $$))*60+extract(SECOND from $$))",
        )
        .time_part(MinuteOfHour, "extract(MINUTE from $$)")
        .time_part(MinuteOfDay, "(extract(HOUR from $$)*60+extract(MINUTE from $$))")
        .time_part(
            MinuteOfWeek,
            "((mod(extract(DAY_OF_WEEK from $$)+6, 7)*24+extract(HOUR from $$))*60+extract(MINUTE from $$))",
        )
        .time_part(
            MinuteOfMonth,
            "(((extract(DAY from $$)-1)*24+extract(HOUR from $$))*60+extract(MINUTE from $$))",
        )
        .time_part(
            MinuteOfYear,
            "(((extract(DAY_OF_YEAR from $$)-1)*24+extract(HOUR from $$))*60+extract(MINUTE from $$))",
        )
        .time_part(HourOfDay, "extract(HOUR from $$)")
        .time_part(
            HourOfWeek,
            "(mod((extract(DAY_OF_WEEK from $$) + 6), 7) * 24 + extract(HOUR from $$))",
        )
        .time_part(HourOfMonth, "((extract(DAY from $$)-1)*24+extract(HOUR from $$))")
        .time_part(HourOfYear, "((extract(DAY_OF_YEAR from $$)-1)*24+extract(HOUR from $$))")
        .time_part(DayOfWeek, "extract(DAY_OF_WEEK from $$)")
        .time_part(DayOfMonth, "extract(DAY from $$)")
        .time_part(DayOfYear, "extract(DAY_OF_YEAR from $$)")
        .time_part(WeekOfYear, "extract(WEEK from $$)")
        .time_part(MonthOfYear, "extract(MONTH from $$)")
        .time_part(Quarter, "extract(QUARTER from $$)")
        .time_part(Year, "extract(YEAR from $$)")
        .build()
}

impl SqlDialect for Presto {
    fn name(&self) -> &'static str {
        "presto"
    }

    fn tables(&self) -> &DialectTables {
        &self.tables
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn time_to_sql(&self, date: Option<&DateTime<Utc>>) -> String {
        match date {
            Some(d) => format!("from_iso8601_timestamp('{}')", helpers::iso_timestamp(d)),
            None => self.format_null().to_string(),
        }
    }

    fn utc_to_walltime(&self, operand: &str, timezone: &Timezone) -> String {
        if !timezone.is_utc() {
            tracing::warn!(
                dialect = self.name(),
                timezone = timezone.name(),
                "wall-clock conversion is not supported; treating timezone as UTC"
            );
        }
        operand.to_string()
    }

    fn bucket_call(&self, operand: &str, spec: &str) -> String {
        format!("DATE_FORMAT({}, '{}')", operand, spec)
    }

    fn add_interval(&self, operand: &str, unit: DurationUnit, amount: u64, negative: bool) -> String {
        let mult = if negative { "-1 * " } else { "" };
        format!("DATE_ADD('{}', {}{}, {})", unit.as_str(), mult, amount, operand)
    }

    fn extract_expression(&self, operand: &str, regexp: &str) -> String {
        format!("regexp_extract({}, {}, 1)", operand, self.quote_string(regexp))
    }

    fn regexp_expression(&self, operand: &str, regexp: &str) -> String {
        format!("regexp_like({}, {})", operand, self.quote_string(regexp))
    }
}
