//! Lifting predicates on the primary time attribute into intervals.
//!
//! Druid scans only the intervals it is given, so top-level conjuncts that
//! restrict the time attribute to ranges are removed from the filter and
//! intersected into an interval list. Everything else stays in the residual
//! filter.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};

use crate::model::expr::and_all;
use crate::model::{Expression, TimeRange, Value};

const OPEN_START: &str = "1000-01-01";
const OPEN_END: &str = "3000-01-01";

/// Result of splitting a filter into intervals and the remaining predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeFilter {
    /// `None` when no conjunct restricted time.
    pub intervals: Option<Vec<TimeRange>>,
    pub rest: Expression,
}

pub fn split_time_filter(filter: &Expression, time_attribute: Option<&str>) -> TimeFilter {
    let Some(attr) = time_attribute else {
        return TimeFilter {
            intervals: None,
            rest: filter.clone(),
        };
    };
    let conjuncts = match filter {
        Expression::And { operands } => operands.clone(),
        other => vec![other.clone()],
    };

    let mut intervals: Option<Vec<TimeRange>> = None;
    let mut rest = Vec::new();
    for clause in conjuncts {
        match clause_ranges(&clause, attr) {
            Some(ranges) => {
                intervals = Some(match intervals {
                    None => ranges,
                    Some(current) => intersect_all(&current, &ranges),
                });
            }
            None => rest.push(clause),
        }
    }
    TimeFilter {
        intervals,
        rest: and_all(rest),
    }
}

fn clause_ranges(clause: &Expression, attr: &str) -> Option<Vec<TimeRange>> {
    let (operand, value) = match clause {
        Expression::In {
            operand,
            expression,
        }
        | Expression::Is {
            operand,
            expression,
        }
        | Expression::GreaterThan {
            operand,
            expression,
        }
        | Expression::GreaterThanOrEqual {
            operand,
            expression,
        }
        | Expression::LessThan {
            operand,
            expression,
        }
        | Expression::LessThanOrEqual {
            operand,
            expression,
        } => (operand, expression.as_literal()?),
        _ => return None,
    };
    if operand.as_ref_name() != Some(attr) {
        return None;
    }

    let one_ms = ChronoDuration::milliseconds(1);
    let open = |start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>| {
        Some(vec![TimeRange { start, end }])
    };
    match (clause, value) {
        (Expression::In { .. }, Value::TimeRange(range)) => Some(vec![range.clone()]),
        (Expression::In { .. }, Value::Set(set)) => set
            .elements
            .iter()
            .map(|e| match e {
                Value::TimeRange(range) => Some(range.clone()),
                Value::Time(t) => Some(TimeRange::instant(*t)),
                _ => None,
            })
            .collect(),
        (Expression::Is { .. }, Value::Time(t)) => Some(vec![TimeRange::instant(*t)]),
        (Expression::GreaterThan { .. }, Value::Time(t)) => open(Some(*t + one_ms), None),
        (Expression::GreaterThanOrEqual { .. }, Value::Time(t)) => open(Some(*t), None),
        (Expression::LessThan { .. }, Value::Time(t)) => open(None, Some(*t)),
        (Expression::LessThanOrEqual { .. }, Value::Time(t)) => open(None, Some(*t + one_ms)),
        _ => None,
    }
}

fn intersect_all(a: &[TimeRange], b: &[TimeRange]) -> Vec<TimeRange> {
    a.iter()
        .flat_map(|x| b.iter().filter_map(move |y| x.intersect(y)))
        .collect()
}

/// Druid intervals for lifted ranges. No lifted conjunct scans everything;
/// ranges that intersect to nothing become one zero-width interval.
pub fn druid_intervals(ranges: Option<&[TimeRange]>) -> Vec<String> {
    match ranges {
        None => vec![druid_interval(&TimeRange::unbounded())],
        Some([]) => vec![format!("{}/{}", OPEN_START, OPEN_START)],
        Some(ranges) => ranges.iter().map(druid_interval).collect(),
    }
}

/// `start/end` with trailing zero fields trimmed and open bounds made explicit.
pub fn druid_interval(range: &TimeRange) -> String {
    format!(
        "{}/{}",
        range.start.as_ref().map(trim_time).unwrap_or_else(|| OPEN_START.into()),
        range.end.as_ref().map(trim_time).unwrap_or_else(|| OPEN_END.into())
    )
}

/// `2015-03-12`, `2015-03-14T01`, `2015-03-14T01:30`, `2015-03-12T01:00:00.123`.
pub fn trim_time(t: &DateTime<Utc>) -> String {
    let millis = t.timestamp_subsec_millis();
    if millis != 0 {
        t.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
    } else if t.second() != 0 {
        t.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else if t.minute() != 0 {
        t.format("%Y-%m-%dT%H:%M").to_string()
    } else if t.hour() != 0 {
        t.format("%Y-%m-%dT%H").to_string()
    } else {
        t.format("%Y-%m-%d").to_string()
    }
}
