//! Integration tests for SQL dialects.
//!
//! Each built-in dialect is exercised through the same primitives, and a
//! custom table set is attached to a dataset to show that the compiler
//! renders through the instance it is given.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use heron::compile::compile;
use heron::external::{CompileError, Engine, ExternalValue};
use heron::model::{r, AttributeInfo, Duration, PlyType, TimePart, Timezone};
use heron::sql::dialect::{DialectTables, Presto};
use heron::sql::{Dialect, DialectError, SqlDialect};
use regex::Regex;

const ALL: [Dialect; 4] = [
    Dialect::Presto,
    Dialect::BigQuery,
    Dialect::Postgres,
    Dialect::MySql,
];

fn external(engine: Engine) -> ExternalValue {
    ExternalValue::builder(engine, "wiki")
        .time_attribute("time")
        .attributes([
            AttributeInfo::time("time"),
            AttributeInfo::string("page"),
            AttributeInfo::number("added"),
        ])
        .build()
        .unwrap()
}

// ============================================================================
// Shared primitives
// ============================================================================

#[test]
fn test_every_dialect_floors_to_the_hour_and_day() {
    for dialect in ALL {
        let d = dialect.dialect();
        for duration in ["PT1H", "P1D"] {
            let sql = d
                .time_floor_expression("t", &Duration::parse(duration).unwrap(), &Timezone::utc())
                .unwrap();
            assert!(sql.contains('t'), "{}: {}", d.name(), sql);
        }
    }
}

#[test]
fn test_every_dialect_extracts_hour_of_day() {
    for dialect in ALL {
        let d = dialect.dialect();
        assert!(
            d.time_part_expression("t", TimePart::HourOfDay, &Timezone::utc())
                .is_ok(),
            "{}",
            d.name()
        );
    }
}

#[test]
fn test_unsupported_primitives_are_errors() {
    let d = Dialect::Presto.dialect();
    assert_eq!(
        d.time_floor_expression("t", &Duration::parse("PT7M").unwrap(), &Timezone::utc()),
        Err(DialectError::UnsupportedDuration("PT7M".into()))
    );
    assert_eq!(
        d.cast_expression(PlyType::Boolean, "t", PlyType::Time),
        Err(DialectError::UnsupportedCast {
            from: PlyType::Boolean,
            to: PlyType::Time
        })
    );
    assert_eq!(d.cast_expression(PlyType::Number, "x", PlyType::Number), Ok("x".into()));
}

#[test]
fn test_string_quoting() {
    assert_eq!(Dialect::Postgres.dialect().quote_string("it's"), "'it''s'");
    assert_eq!(Dialect::Presto.dialect().quote_identifier("a\"b"), "\"a\"\"b\"");
    assert_eq!(Dialect::BigQuery.dialect().quote_identifier("page"), "`page`");
}

#[test]
fn test_time_literals() {
    let t = Utc.with_ymd_and_hms(2015, 3, 12, 0, 0, 0).unwrap();
    let presto = Dialect::Presto.dialect().time_to_sql(Some(&t));
    assert!(presto.starts_with("from_iso8601_timestamp('2015-03-12"), "{}", presto);
    assert_eq!(
        Dialect::Postgres.dialect().time_to_sql(Some(&t)),
        "TIMESTAMP '2015-03-12 00:00:00.000'"
    );
    assert_eq!(Dialect::MySql.dialect().time_to_sql(None), "NULL");
}

// ============================================================================
// Week parts, evaluated
// ============================================================================

/// Replaces each native date function applied to `t` with the value the
/// database returns for `at`, leaving plain integer arithmetic.
fn substitute_natives(dialect: Dialect, sql: &str, at: &DateTime<Utc>) -> String {
    let (h, m, s) = (at.hour() as i64, at.minute() as i64, at.second() as i64);
    let wd = at.weekday();
    let natives: Vec<(&str, i64)> = match dialect {
        // DAY_OF_WEEK: Monday = 1 .. Sunday = 7
        Dialect::Presto => vec![
            ("extract(DAY_OF_WEEK from t)", wd.number_from_monday() as i64),
            ("extract(HOUR from t)", h),
            ("extract(MINUTE from t)", m),
            ("extract(SECOND from t)", s),
        ],
        // DAYOFWEEK: Sunday = 1 .. Saturday = 7
        Dialect::BigQuery => vec![
            ("EXTRACT(DAYOFWEEK FROM t)", wd.number_from_sunday() as i64),
            ("EXTRACT(HOUR FROM t)", h),
            ("EXTRACT(MINUTE FROM t)", m),
            ("EXTRACT(SECOND FROM t)", s),
        ],
        // DOW: Sunday = 0 .. Saturday = 6; ISODOW: Monday = 1 .. Sunday = 7
        Dialect::Postgres => vec![
            ("CAST(EXTRACT(ISODOW FROM t) AS INT)", wd.number_from_monday() as i64),
            ("CAST(EXTRACT(DOW FROM t) AS INT)", wd.num_days_from_sunday() as i64),
            ("CAST(EXTRACT(HOUR FROM t) AS INT)", h),
            ("CAST(EXTRACT(MINUTE FROM t) AS INT)", m),
            ("CAST(EXTRACT(SECOND FROM t) AS INT)", s),
        ],
        // WEEKDAY: Monday = 0 .. Sunday = 6
        Dialect::MySql => vec![
            ("WEEKDAY(t)", wd.num_days_from_monday() as i64),
            ("TIME_TO_SEC(t)", (h * 60 + m) * 60 + s),
            ("HOUR(t)", h),
            ("MINUTE(t)", m),
        ],
    };
    natives
        .into_iter()
        .fold(sql.to_string(), |acc, (call, value)| acc.replace(call, &value.to_string()))
}

/// Integer arithmetic over `+ - * %`, parentheses and `MOD(a, b)`.
struct Arithmetic<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Arithmetic<'a> {
    fn eval(text: &'a str) -> i64 {
        let mut a = Arithmetic {
            chars: text.chars().peekable(),
        };
        let value = a.sum();
        a.skip_spaces();
        assert!(a.chars.peek().is_none(), "trailing input in {}", text);
        value
    }

    fn skip_spaces(&mut self) {
        while self.chars.peek() == Some(&' ') {
            self.chars.next();
        }
    }

    fn expect(&mut self, c: char) {
        self.skip_spaces();
        assert_eq!(self.chars.next(), Some(c));
    }

    fn sum(&mut self) -> i64 {
        let mut value = self.product();
        loop {
            self.skip_spaces();
            match self.chars.peek() {
                Some('+') => {
                    self.chars.next();
                    value += self.product();
                }
                Some('-') => {
                    self.chars.next();
                    value -= self.product();
                }
                _ => return value,
            }
        }
    }

    fn product(&mut self) -> i64 {
        let mut value = self.atom();
        loop {
            self.skip_spaces();
            match self.chars.peek() {
                Some('*') => {
                    self.chars.next();
                    value *= self.atom();
                }
                Some('%') => {
                    self.chars.next();
                    value %= self.atom();
                }
                _ => return value,
            }
        }
    }

    fn atom(&mut self) -> i64 {
        self.skip_spaces();
        match self.chars.peek().copied() {
            Some('(') => {
                self.chars.next();
                let value = self.sum();
                self.expect(')');
                value
            }
            Some(c) if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(c) = self.chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(c);
                    self.chars.next();
                }
                digits.parse().unwrap()
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let mut name = String::new();
                while let Some(c) = self.chars.peek().copied().filter(char::is_ascii_alphabetic) {
                    name.push(c);
                    self.chars.next();
                }
                assert!(name.eq_ignore_ascii_case("mod"), "unexpected function {}", name);
                self.expect('(');
                let a = self.sum();
                self.expect(',');
                let b = self.sum();
                self.expect(')');
                a % b
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

fn evaluate_part(dialect: Dialect, part: TimePart, at: &DateTime<Utc>) -> i64 {
    let sql = dialect
        .dialect()
        .time_part_expression("t", part, &Timezone::utc())
        .unwrap();
    Arithmetic::eval(&substitute_natives(dialect, &sql, at))
}

#[test]
fn test_week_parts_start_on_monday() {
    // 2015-03-09 is a Monday, 2015-03-15 the Sunday closing that week.
    let cases: [(DateTime<Utc>, i64); 5] = [
        (Utc.with_ymd_and_hms(2015, 3, 9, 0, 0, 0).unwrap(), 0),
        (Utc.with_ymd_and_hms(2015, 3, 9, 23, 59, 59).unwrap(), 0),
        (Utc.with_ymd_and_hms(2015, 3, 15, 0, 0, 0).unwrap(), 6),
        (Utc.with_ymd_and_hms(2015, 3, 15, 23, 59, 59).unwrap(), 6),
        (Utc.with_ymd_and_hms(2015, 3, 12, 5, 42, 17).unwrap(), 3),
    ];
    for dialect in ALL {
        let name = dialect.dialect().name();
        for &(at, day) in &cases {
            let at = &at;
            let hour = day * 24 + at.hour() as i64;
            let minute = hour * 60 + at.minute() as i64;
            let second = minute * 60 + at.second() as i64;

            assert_eq!(evaluate_part(dialect, TimePart::DayOfWeek, at), day + 1, "{} {}", name, at);
            assert_eq!(evaluate_part(dialect, TimePart::HourOfWeek, at), hour, "{} {}", name, at);
            assert_eq!(evaluate_part(dialect, TimePart::MinuteOfWeek, at), minute, "{} {}", name, at);
            assert_eq!(evaluate_part(dialect, TimePart::SecondOfWeek, at), second, "{} {}", name, at);
        }

        let monday = Utc.with_ymd_and_hms(2015, 3, 9, 0, 0, 0).unwrap();
        let sunday = Utc.with_ymd_and_hms(2015, 3, 15, 0, 0, 0).unwrap();
        for h in 0..24 {
            let shift = chrono::Duration::hours(h);
            let on_monday = evaluate_part(dialect, TimePart::HourOfWeek, &(monday + shift));
            let on_sunday = evaluate_part(dialect, TimePart::HourOfWeek, &(sunday + shift));
            assert!((0..=23).contains(&on_monday), "{} monday {}", name, on_monday);
            assert!((144..=167).contains(&on_sunday), "{} sunday {}", name, on_sunday);
        }
    }
}

#[test]
fn test_arithmetic_evaluator() {
    assert_eq!(Arithmetic::eval("(MOD(1 + 5, 7) * 24 + 3)"), 147);
    assert_eq!(Arithmetic::eval("((0 + 6) % 7)"), 6);
    assert_eq!(Arithmetic::eval("mod((7+6), 7)*24-1"), 143);
}

// ============================================================================
// Time shifts
// ============================================================================

/// Signed `(unit, amount)` pairs of every interval step in a shift chain.
fn shift_steps(dialect: Dialect, sql: &str) -> Vec<(String, i64)> {
    let signed = |negative: bool, amount: &str| {
        let n: i64 = amount.parse().unwrap();
        if negative {
            -n
        } else {
            n
        }
    };
    match dialect {
        Dialect::Presto => Regex::new(r"DATE_ADD\('(\w+)', (-1 \* )?(\d+), ")
            .unwrap()
            .captures_iter(sql)
            .map(|c| (c[1].to_lowercase(), signed(c.get(2).is_some(), &c[3])))
            .collect(),
        Dialect::Postgres => Regex::new(r"([+-]) INTERVAL '(\d+) (\w+)'")
            .unwrap()
            .captures_iter(sql)
            .map(|c| (c[3].to_lowercase(), signed(&c[1] == "-", &c[2])))
            .collect(),
        Dialect::BigQuery | Dialect::MySql => {
            // Calls nest, so the outermost name pairs with the last interval.
            let calls: Vec<bool> = Regex::new(r"DATE(?:TIME)?_(ADD|SUB)\(")
                .unwrap()
                .captures_iter(sql)
                .map(|c| &c[1] == "SUB")
                .collect();
            let intervals: Vec<(String, String)> = Regex::new(r"INTERVAL (\d+) (\w+)\)")
                .unwrap()
                .captures_iter(sql)
                .map(|c| (c[1].to_string(), c[2].to_lowercase()))
                .collect();
            assert_eq!(calls.len(), intervals.len(), "{}", sql);
            calls
                .into_iter()
                .rev()
                .zip(intervals)
                .map(|(negative, (amount, unit))| (unit, signed(negative, &amount)))
                .collect()
        }
    }
}

fn net_by_unit(steps: &[(String, i64)]) -> BTreeMap<String, i64> {
    let mut net = BTreeMap::new();
    for (unit, amount) in steps {
        *net.entry(unit.clone()).or_insert(0) += amount;
    }
    net
}

#[test]
fn test_shifts_by_opposite_steps_cancel() {
    let durations = ["P1Y2M3DT4H5M6S", "P2W", "PT1H", "P1M"];
    for dialect in ALL {
        let d = dialect.dialect();
        for text in durations {
            let duration = Duration::parse(text).unwrap();
            for n in [1, 2, 5] {
                assert_eq!(d.time_shift_expression("t", &duration, 0, &Timezone::utc()), "t");

                let forward = d.time_shift_expression("t", &duration, n, &Timezone::utc());
                let back = d.time_shift_expression("t", &duration, -n, &Timezone::utc());
                let forward_steps = shift_steps(dialect, &forward);
                let back_steps = shift_steps(dialect, &back);

                let expected: Vec<(String, i64)> = duration
                    .components()
                    .into_iter()
                    .map(|(unit, k)| (unit.as_str().to_string(), k as i64 * n as i64))
                    .collect();
                assert_eq!(net_by_unit(&forward_steps), net_by_unit(&expected), "{} {}", d.name(), forward);
                assert_eq!(forward_steps.len(), expected.len(), "{} {}", d.name(), forward);

                // A negative step flips every component and nothing else.
                let flipped: Vec<(String, i64)> =
                    forward_steps.iter().map(|(u, a)| (u.clone(), -a)).collect();
                assert_eq!(back_steps, flipped, "{} {}", d.name(), back);

                let round_trip = d.time_shift_expression(&forward, &duration, -n, &Timezone::utc());
                let net = net_by_unit(&shift_steps(dialect, &round_trip));
                assert!(net.values().all(|a| *a == 0), "{} {}", d.name(), round_trip);
                assert_eq!(net.len(), expected.len(), "{} {}", d.name(), round_trip);
            }
        }
    }
}

// ============================================================================
// Dialects attached to a dataset
// ============================================================================

#[test]
fn test_engine_default_dialect_rejects_unknown_bucket() {
    let e = r("wiki")
        .split_on(
            "FiveMin",
            r("time").time_bucket(Duration::parse("PT5M").unwrap(), None),
            "data",
        )
        .apply("Count", r("data").count());
    assert_eq!(
        compile(&external(Engine::Presto), &e),
        Err(CompileError::UnsupportedDuration("PT5M".into()))
    );
}

#[test]
fn test_custom_tables_are_used() {
    let tables = DialectTables::builder()
        .bucket("PT5M", "%Y-%m-%d %H:%i:00Z")
        .build()
        .unwrap();
    let external = ExternalValue::builder(Engine::Presto, "wiki")
        .time_attribute("time")
        .attributes([AttributeInfo::time("time"), AttributeInfo::string("page")])
        .dialect(Arc::new(Presto::with_tables(tables)))
        .build()
        .unwrap();

    let e = r("wiki")
        .split_on(
            "FiveMin",
            r("time").time_bucket(Duration::parse("PT5M").unwrap(), None),
            "data",
        )
        .apply("Count", r("data").count());
    let queries = compile(&external, &e).unwrap();
    let sql = queries[0].as_sql().unwrap();
    assert!(
        sql.contains("DATE_FORMAT(\"time\", '%Y-%m-%d %H:%i:00Z') AS \"FiveMin\""),
        "{}",
        sql
    );
}

#[test]
fn test_dialect_cannot_attach_to_druid() {
    let result = ExternalValue::builder(Engine::Druid, "wiki")
        .dialect(Arc::new(Presto::new()))
        .build();
    assert!(matches!(result, Err(CompileError::InvalidConfig(_))));
}
