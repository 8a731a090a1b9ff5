//! Shared helper functions for SQL dialect implementations.
//!
//! This module provides reusable building blocks that dialects can compose
//! to implement the `SqlDialect` trait with minimal duplication.

use chrono::{DateTime, Utc};

use crate::model::types::format_time;
use crate::model::{Duration, DurationUnit};

// =============================================================================
// Identifier Quoting
// =============================================================================

/// Quote identifier with double quotes (ANSI style).
/// Used by: Presto/Athena, Postgres
pub fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote identifier with backticks.
/// Used by: MySQL, BigQuery
pub fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

// =============================================================================
// String Quoting
// =============================================================================

/// Quote string with single quotes (standard SQL).
/// Used by: Presto/Athena, Postgres
pub fn quote_string_single(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote string with single quotes, backslash-escaping quotes and backslashes.
/// Used by: MySQL, BigQuery
pub fn quote_string_backslash(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

// =============================================================================
// Boolean Formatting
// =============================================================================

/// Format boolean as literal true/false.
/// Used by: Presto/Athena, Postgres, BigQuery
pub fn format_bool_literal(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Format boolean as numeric 1/0.
/// Used by: MySQL
pub fn format_bool_numeric(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

// =============================================================================
// Pagination
// =============================================================================

use super::super::token::{Token, TokenStream};

/// Emit LIMIT ... OFFSET ... (standard SQL).
/// Used by: all supported dialects
pub fn emit_limit_offset_standard(limit: Option<u64>, offset: Option<u64>) -> TokenStream {
    let mut ts = TokenStream::new();

    if let Some(lim) = limit {
        ts.push(Token::Limit)
            .space()
            .push(Token::LitInt(lim as i64));
    }

    if let Some(off) = offset {
        if limit.is_some() {
            ts.space();
        }
        ts.push(Token::Offset)
            .space()
            .push(Token::LitInt(off as i64));
    }

    ts
}

// =============================================================================
// Time
// =============================================================================

/// Components of `duration * |step|` in the order shifts are nested.
///
/// The order is week, month, year, day, hour, minute, second.
pub fn shift_components(duration: &Duration, step: i32) -> Vec<(DurationUnit, u64)> {
    let k = step.unsigned_abs() as u64;
    [
        (DurationUnit::Week, duration.weeks),
        (DurationUnit::Month, duration.months),
        (DurationUnit::Year, duration.years),
        (DurationUnit::Day, duration.days),
        (DurationUnit::Hour, duration.hours),
        (DurationUnit::Minute, duration.minutes),
        (DurationUnit::Second, duration.seconds),
    ]
    .into_iter()
    .filter(|(_, n)| *n > 0)
    .map(|(u, n)| (u, n as u64 * k))
    .collect()
}

/// `2015-09-12T23:59:00.000Z`
pub fn iso_timestamp(date: &DateTime<Utc>) -> String {
    format_time(date)
}

/// `2015-09-12 23:59:00.000` (no zone designator).
pub fn naive_timestamp(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}
