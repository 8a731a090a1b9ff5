//! MySQL dialect.
//!
//! MySQL features:
//! - Backtick identifier quoting
//! - Backslash escapes in string literals
//! - Booleans as 1/0
//! - `DATE_FORMAT` patterns for bucketing, `CONVERT_TZ` for wall-clock time
//! - `DATE_ADD(t, INTERVAL n UNIT)` for shifts

use chrono::{DateTime, Utc};

use super::helpers;
use super::template::DialectTables;
use super::SqlDialect;
use crate::model::{DurationUnit, PlyType, TimePart, Timezone};

/// MySQL dialect.
#[derive(Debug, Clone)]
pub struct MySql {
    tables: DialectTables,
}

impl MySql {
    pub fn new() -> Self {
        Self {
            tables: default_tables().expect("built-in tables are valid"),
        }
    }

    pub fn with_tables(tables: DialectTables) -> Self {
        Self { tables }
    }
}

impl Default for MySql {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_tables() -> Result<DialectTables, super::TemplateError> {
    use PlyType::*;
    use TimePart::*;

    DialectTables::builder()
        .bucket("PT1S", "%Y-%m-%d %H:%i:%s")
        .bucket("PT1M", "%Y-%m-%d %H:%i:00")
        .bucket("PT1H", "%Y-%m-%d %H:00:00")
        .bucket("P1D", "%Y-%m-%d 00:00:00")
        .bucket("P1M", "%Y-%m-01 00:00:00")
        .bucket("P1Y", "%Y-01-01 00:00:00")
        .cast(Time, Number, "FROM_UNIXTIME($$ / 1000)")
        .cast(Time, String, "CAST($$ AS DATETIME)")
        .cast(Number, Time, "(UNIX_TIMESTAMP($$) * 1000)")
        .cast(Number, String, "CAST($$ AS SIGNED)")
        .cast(String, Number, "CAST($$ AS CHAR)")
        .cast(String, Time, "DATE_FORMAT($$, '%Y-%m-%dT%H:%i:%s.000Z')")
        .time_part(SecondOfMinute, "SECOND($$)")
        .time_part(SecondOfHour, "(MINUTE($$) * 60 + SECOND($$))")
        .time_part(SecondOfDay, "TIME_TO_SEC($$)")
        .time_part(SecondOfWeek, "(WEEKDAY($$) * 86400 + TIME_TO_SEC($$))")
        .time_part(MinuteOfHour, "MINUTE($$)")
        .time_part(MinuteOfDay, "(HOUR($$) * 60 + MINUTE($$))")
        .time_part(MinuteOfWeek, "((WEEKDAY($$) * 24 + HOUR($$)) * 60 + MINUTE($$))")
        .time_part(HourOfDay, "HOUR($$)")
        .time_part(HourOfWeek, "(WEEKDAY($$) * 24 + HOUR($$))")
        .time_part(HourOfMonth, "((DAYOFMONTH($$) - 1) * 24 + HOUR($$))")
        .time_part(HourOfYear, "((DAYOFYEAR($$) - 1) * 24 + HOUR($$))")
        .time_part(DayOfWeek, "(WEEKDAY($$) + 1)")
        .time_part(DayOfMonth, "DAYOFMONTH($$)")
        .time_part(DayOfYear, "DAYOFYEAR($$)")
        .time_part(WeekOfYear, "WEEK($$, 3)")
        .time_part(MonthOfYear, "MONTH($$)")
        .time_part(Quarter, "QUARTER($$)")
        .time_part(Year, "YEAR($$)")
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

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
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

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn time_to_sql(&self, date: Option<&DateTime<Utc>>) -> String {
        match date {
            Some(d) => format!("TIMESTAMP('{}')", helpers::naive_timestamp(d)),
            None => self.format_null().to_string(),
        }
    }

    fn utc_to_walltime(&self, operand: &str, timezone: &Timezone) -> String {
        if timezone.is_utc() {
            return operand.to_string();
        }
        format!("CONVERT_TZ({},'+0:00','{}')", operand, timezone.name())
    }

    fn walltime_to_utc(&self, operand: &str, timezone: &Timezone) -> String {
        if timezone.is_utc() {
            return operand.to_string();
        }
        format!("CONVERT_TZ({},'{}','+0:00')", operand, timezone.name())
    }

    fn bucket_call(&self, operand: &str, spec: &str) -> String {
        format!("DATE_FORMAT({}, '{}')", operand, spec)
    }

    fn add_interval(&self, operand: &str, unit: DurationUnit, amount: u64, negative: bool) -> String {
        let func = if negative { "DATE_SUB" } else { "DATE_ADD" };
        format!("{}({}, INTERVAL {} {})", func, operand, amount, unit_keyword(unit))
    }

    fn extract_expression(&self, operand: &str, regexp: &str) -> String {
        format!("REGEXP_SUBSTR({}, {})", operand, self.quote_string(regexp))
    }

    fn regexp_expression(&self, operand: &str, regexp: &str) -> String {
        format!("({} REGEXP {})", operand, self.quote_string(regexp))
    }

    fn contains_expression(&self, a: &str, b: &str) -> String {
        format!("LOCATE({},{})>0", b, a)
    }

    fn index_of_expression(&self, a: &str, b: &str) -> String {
        format!("LOCATE({}, {}) - 1", b, a)
    }
}
