//! SQL dialect definitions and rendering rules.
//!
//! Every relational backend supplies a `SqlDialect`. The trait declares one
//! method per primitive that has no portable SQL spelling; the defaults carry
//! the common-denominator behavior and each backend overrides only where its
//! syntax differs:
//!
//! | Primitive | Presto/Athena | BigQuery | Postgres | MySQL |
//! |-----------|---------------|----------|----------|-------|
//! | Identifier quote | `"x"` | `` `x` `` | `"x"` | `` `x` `` |
//! | Time floor | `DATE_FORMAT` | `TIMESTAMP_TRUNC` | `DATE_TRUNC` | `DATE_FORMAT` |
//! | Time shift | `DATE_ADD('unit', n, t)` | `DATETIME_ADD` | `t + INTERVAL` | `DATE_ADD` |
//! | Wall-clock conversion | identity (UTC only) | `DATETIME(t, tz)` | `AT TIME ZONE` | `CONVERT_TZ` |
//! | Regex match | `regexp_like` | `REGEXP_CONTAINS` | `~` | `REGEXP` |
//!
//! The cast, bucketing and time-part tables are plain data held by each
//! dialect instance (`DialectTables`), so a backend variant can be assembled
//! from different tables without a new type:
//!
//! ```ignore
//! use heron::sql::dialect::{DialectTables, Presto, SqlDialect};
//!
//! let tables = DialectTables::builder()
//!     .cast(PlyType::String, PlyType::Number, "cast($$ as varchar)")
//!     .build()?;
//! let dialect = Presto::with_tables(tables);
//! ```

mod bigquery;
pub mod helpers;
mod mysql;
mod postgres;
mod presto;
pub mod template;

pub use bigquery::BigQuery;
pub use mysql::MySql;
pub use postgres::Postgres;
pub use presto::Presto;
pub use template::{DialectTables, DialectTablesBuilder, Template, TemplateError};

use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;

use super::token::TokenStream;
use crate::model::types::format_number;
use crate::model::{Duration, DurationUnit, PlyType, TimePart, Timezone};

/// A dialect cannot express a primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DialectError {
    #[error("Unsupported cast from {from} to {to}")]
    UnsupportedCast { from: PlyType, to: PlyType },

    #[error("Unsupported duration '{0}'")]
    UnsupportedDuration(String),

    #[error("Unsupported time part {0}")]
    UnsupportedTimePart(TimePart),
}

/// SQL dialect trait - defines how backend-specific primitives are rendered.
///
/// Operands are already-rendered SQL fragments; every method returns a new
/// fragment.
pub trait SqlDialect: std::fmt::Debug + Send + Sync {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    /// Cast, bucketing and time-part lookup tables.
    fn tables(&self) -> &DialectTables;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn format_null(&self) -> &'static str {
        "NULL"
    }

    fn format_number(&self, n: f64) -> String {
        format_number(n)
    }

    /// Render a timestamp literal; `None` renders the null literal.
    fn time_to_sql(&self, date: Option<&DateTime<Utc>>) -> String;

    // =========================================================================
    // Pagination
    // =========================================================================

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_standard(limit, offset)
    }

    // =========================================================================
    // Casts
    // =========================================================================

    /// Look up `[to][from]` in the cast table and substitute `operand`.
    fn cast_expression(
        &self,
        from: PlyType,
        operand: &str,
        to: PlyType,
    ) -> Result<String, DialectError> {
        if from == to {
            return Ok(operand.to_string());
        }
        self.tables()
            .cast(from, to)
            .map(|t| t.render(operand))
            .ok_or(DialectError::UnsupportedCast { from, to })
    }

    // =========================================================================
    // Timezone conversion
    // =========================================================================

    fn utc_to_walltime(&self, operand: &str, _timezone: &Timezone) -> String {
        operand.to_string()
    }

    fn walltime_to_utc(&self, operand: &str, _timezone: &Timezone) -> String {
        operand.to_string()
    }

    // =========================================================================
    // Time bucketing and parts
    // =========================================================================

    /// Apply one bucketing table entry to a wall-clock operand.
    fn bucket_call(&self, operand: &str, spec: &str) -> String;

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
        let wall = self.utc_to_walltime(operand, timezone);
        Ok(self.walltime_to_utc(&self.bucket_call(&wall, spec), timezone))
    }

    fn time_bucket_expression(
        &self,
        operand: &str,
        duration: &Duration,
        timezone: &Timezone,
    ) -> Result<String, DialectError> {
        self.time_floor_expression(operand, duration, timezone)
    }

    fn time_part_expression(
        &self,
        operand: &str,
        part: TimePart,
        timezone: &Timezone,
    ) -> Result<String, DialectError> {
        let template = self
            .tables()
            .time_part(part)
            .ok_or(DialectError::UnsupportedTimePart(part))?;
        Ok(template.render(&self.utc_to_walltime(operand, timezone)))
    }

    // =========================================================================
    // Time shift
    // =========================================================================

    /// Add (or subtract, when `negative`) `amount` units to `operand`.
    fn add_interval(&self, operand: &str, unit: DurationUnit, amount: u64, negative: bool)
        -> String;

    /// One nested interval call per non-zero component; `step == 0` is the identity.
    fn time_shift_expression(
        &self,
        operand: &str,
        duration: &Duration,
        step: i32,
        timezone: &Timezone,
    ) -> String {
        if step == 0 {
            return operand.to_string();
        }
        let mut expr = self.utc_to_walltime(operand, timezone);
        for (unit, amount) in helpers::shift_components(duration, step) {
            expr = self.add_interval(&expr, unit, amount, step < 0);
        }
        self.walltime_to_utc(&expr, timezone)
    }

    // =========================================================================
    // Strings
    // =========================================================================

    /// First capture group of `regexp`, NULL when it does not match.
    fn extract_expression(&self, operand: &str, regexp: &str) -> String {
        format!("REGEXP_EXTRACT({}, {}, 1)", operand, self.quote_string(regexp))
    }

    fn regexp_expression(&self, operand: &str, regexp: &str) -> String;

    fn contains_expression(&self, a: &str, b: &str) -> String {
        format!("STRPOS({},{})>0", a, b)
    }

    fn concat_expression(&self, a: &str, b: &str) -> String {
        format!("CONCAT({},{})", a, b)
    }

    /// Zero-based position of `b` in `a`, -1 when absent.
    fn index_of_expression(&self, a: &str, b: &str) -> String {
        format!("STRPOS({}, {}) - 1", a, b)
    }

    /// `position` is zero-based.
    fn substr_expression(&self, operand: &str, position: i64, len: i64) -> String {
        format!("SUBSTR({}, {}, {})", operand, position + 1, len)
    }

    /// Null-safe equality: `IS NULL` when either side is the null literal.
    fn is_not_distinct_from_expression(&self, a: &str, b: &str) -> String {
        let null = self.format_null();
        if a == null {
            format!("{} IS {}", b, null)
        } else if b == null {
            format!("{} IS {}", a, null)
        } else {
            format!("({}={})", a, b)
        }
    }
}

/// Built-in dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Presto,
    BigQuery,
    Postgres,
    MySql,
}

static PRESTO: Lazy<Presto> = Lazy::new(Presto::new);
static BIGQUERY: Lazy<BigQuery> = Lazy::new(BigQuery::new);
static POSTGRES: Lazy<Postgres> = Lazy::new(Postgres::new);
static MYSQL: Lazy<MySql> = Lazy::new(MySql::new);

impl Dialect {
    /// Get the shared dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::Presto => &*PRESTO,
            Dialect::BigQuery => &*BIGQUERY,
            Dialect::Postgres => &*POSTGRES,
            Dialect::MySql => &*MYSQL,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "presto" | "athena" | "trino" => Ok(Dialect::Presto),
            "bigquery" => Ok(Dialect::BigQuery),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            other => Err(format!("unknown dialect: {}", other)),
        }
    }
}
