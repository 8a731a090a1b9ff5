//! PostgreSQL dialect.
//!
//! PostgreSQL features:
//! - Double-quote identifier quoting
//! - `DATE_TRUNC('unit', t)` for bucketing
//! - `AT TIME ZONE` for wall-clock conversion
//! - Interval arithmetic (`t + INTERVAL '1 day'`)
//! - POSIX regex operator `~`

use chrono::{DateTime, Utc};

use super::helpers;
use super::template::DialectTables;
use super::SqlDialect;
use crate::model::{DurationUnit, PlyType, TimePart, Timezone};

/// PostgreSQL dialect.
#[derive(Debug, Clone)]
pub struct Postgres {
    tables: DialectTables,
}

impl Postgres {
    pub fn new() -> Self {
        Self {
            tables: default_tables().expect("built-in tables are valid"),
        }
    }

    pub fn with_tables(tables: DialectTables) -> Self {
        Self { tables }
    }
}

impl Default for Postgres {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_int(field: &str) -> String {
    format!("CAST(EXTRACT({} FROM $$) AS INT)", field)
}

pub fn default_tables() -> Result<DialectTables, super::TemplateError> {
    use PlyType::*;
    use TimePart::*;

    let second = extract_int("SECOND");
    let minute = extract_int("MINUTE");
    let hour = extract_int("HOUR");
    let day = extract_int("DAY");
    let doy = extract_int("DOY");
    // Monday = 0
    let dow0 = format!("(({} + 6) % 7)", extract_int("DOW"));

    DialectTables::builder()
        .bucket("PT1S", "second")
        .bucket("PT1M", "minute")
        .bucket("PT1H", "hour")
        .bucket("P1D", "day")
        .bucket("P1W", "week")
        .bucket("P1M", "month")
        .bucket("P1Y", "year")
        .cast(Time, Number, "TO_TIMESTAMP(CAST($$ AS DOUBLE PRECISION) / 1000)")
        .cast(Time, String, "CAST($$ AS TIMESTAMP)")
        .cast(Number, Time, "CAST(EXTRACT(EPOCH FROM $$) * 1000 AS BIGINT)")
        .cast(Number, String, "CAST($$ AS DOUBLE PRECISION)")
        .cast(String, Number, "CAST($$ AS TEXT)")
        .cast(String, Time, "TO_CHAR($$, 'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"')")
        .time_part(SecondOfMinute, &second)
        .time_part(SecondOfHour, &format!("({} * 60 + {})", minute, second))
        .time_part(SecondOfDay, "CAST(EXTRACT(EPOCH FROM CAST($$ AS TIME)) AS INT)")
        .time_part(
            SecondOfWeek,
            &format!("((({} * 24 + {}) * 60 + {}) * 60 + {})", dow0, hour, minute, second),
        )
        .time_part(MinuteOfHour, &minute)
        .time_part(MinuteOfDay, &format!("({} * 60 + {})", hour, minute))
        .time_part(
            MinuteOfWeek,
            &format!("(({} * 24 + {}) * 60 + {})", dow0, hour, minute),
        )
        .time_part(
            MinuteOfMonth,
            &format!("((({} - 1) * 24 + {}) * 60 + {})", day, hour, minute),
        )
        .time_part(HourOfDay, &hour)
        .time_part(HourOfWeek, &format!("({} * 24 + {})", dow0, hour))
        .time_part(HourOfMonth, &format!("(({} - 1) * 24 + {})", day, hour))
        .time_part(HourOfYear, &format!("(({} - 1) * 24 + {})", doy, hour))
        .time_part(DayOfWeek, &extract_int("ISODOW"))
        .time_part(DayOfMonth, &day)
        .time_part(DayOfYear, &doy)
        .time_part(WeekOfYear, &extract_int("WEEK"))
        .time_part(MonthOfYear, &extract_int("MONTH"))
        .time_part(Quarter, &extract_int("QUARTER"))
        .time_part(Year, &extract_int("YEAR"))
        .build()
}

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn tables(&self) -> &DialectTables {
        &self.tables
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn time_to_sql(&self, date: Option<&DateTime<Utc>>) -> String {
        match date {
            Some(d) => format!("TIMESTAMP '{}'", helpers::naive_timestamp(d)),
            None => self.format_null().to_string(),
        }
    }

    fn utc_to_walltime(&self, operand: &str, timezone: &Timezone) -> String {
        if timezone.is_utc() {
            return operand.to_string();
        }
        format!("(({} AT TIME ZONE 'UTC') AT TIME ZONE '{}')", operand, timezone.name())
    }

    fn walltime_to_utc(&self, operand: &str, timezone: &Timezone) -> String {
        if timezone.is_utc() {
            return operand.to_string();
        }
        format!("(({} AT TIME ZONE '{}') AT TIME ZONE 'UTC')", operand, timezone.name())
    }

    fn bucket_call(&self, operand: &str, spec: &str) -> String {
        format!("DATE_TRUNC('{}', {})", spec, operand)
    }

    fn add_interval(&self, operand: &str, unit: DurationUnit, amount: u64, negative: bool) -> String {
        let sign = if negative { '-' } else { '+' };
        format!("({} {} INTERVAL '{} {}')", operand, sign, amount, unit.as_str())
    }

    fn extract_expression(&self, operand: &str, regexp: &str) -> String {
        format!("SUBSTRING({} FROM {})", operand, self.quote_string(regexp))
    }

    fn regexp_expression(&self, operand: &str, regexp: &str) -> String {
        format!("({} ~ {})", operand, self.quote_string(regexp))
    }

    fn concat_expression(&self, a: &str, b: &str) -> String {
        format!("({}||{})", a, b)
    }
}
