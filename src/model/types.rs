//! Abstract types and literal values of the expression algebra.

use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The abstract type set every expression node resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlyType {
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "NUMBER")]
    Number,
    #[serde(rename = "TIME")]
    Time,
    #[serde(rename = "BOOLEAN")]
    Boolean,
    #[serde(rename = "SET/STRING")]
    SetString,
    #[serde(rename = "NULL")]
    Null,
    /// A reference to a whole dataset (the operand of split/filter/aggregates).
    #[serde(rename = "DATASET")]
    Dataset,
}

impl PlyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlyType::String => "STRING",
            PlyType::Number => "NUMBER",
            PlyType::Time => "TIME",
            PlyType::Boolean => "BOOLEAN",
            PlyType::SetString => "SET/STRING",
            PlyType::Null => "NULL",
            PlyType::Dataset => "DATASET",
        }
    }

    /// Whether a value of `self` may stand where `expected` is required.
    pub fn conforms_to(&self, expected: PlyType) -> bool {
        *self == expected || *self == PlyType::Null
    }
}

impl fmt::Display for PlyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Ranges and sets
// ============================================================================

/// Half-open time interval `[start, end)`. A missing bound is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// The minimal range containing exactly one instant.
    pub fn instant(t: DateTime<Utc>) -> Self {
        Self::new(t, t + ChronoDuration::milliseconds(1))
    }

    pub fn unbounded() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// Intersection of two ranges, `None` when they do not overlap.
    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        match (start, end) {
            (Some(s), Some(e)) if s >= e => None,
            _ => Some(TimeRange { start, end }),
        }
    }
}

/// Half-open numeric interval `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberRange {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl NumberRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }
}

/// A homogeneous set literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Set {
    pub set_type: PlyType,
    pub elements: Vec<Value>,
}

impl Set {
    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            set_type: PlyType::String,
            elements: items.into_iter().map(|s| Value::String(s.into())).collect(),
        }
    }

    pub fn time_ranges(ranges: Vec<TimeRange>) -> Self {
        Self {
            set_type: PlyType::Time,
            elements: ranges.into_iter().map(Value::TimeRange).collect(),
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.elements.iter().any(|e| e == value)
    }
}

// ============================================================================
// Value
// ============================================================================

/// A literal value carried by `Expression::Literal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Time(DateTime<Utc>),
    TimeRange(TimeRange),
    NumberRange(NumberRange),
    Set(Set),
}

impl Value {
    pub fn ply_type(&self) -> PlyType {
        match self {
            Value::Null => PlyType::Null,
            Value::Boolean(_) => PlyType::Boolean,
            Value::Number(_) | Value::NumberRange(_) => PlyType::Number,
            Value::String(_) => PlyType::String,
            Value::Time(_) | Value::TimeRange(_) => PlyType::Time,
            Value::Set(s) if s.set_type == PlyType::String => PlyType::SetString,
            Value::Set(s) => s.set_type,
        }
    }

    /// Render a scalar the way row-oriented engines compare it: as a string.
    pub fn to_native_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Boolean(b) => Some(b.to_string()),
            Value::Number(n) => Some(format_number(*n)),
            Value::String(s) => Some(s.clone()),
            Value::Time(t) => Some(format_time(t)),
            other => Some(other.to_string()),
        }
    }

    /// Convert a JSON scalar returned by a backend into a typed value.
    pub fn from_json(json: &serde_json::Value, ty: PlyType) -> Option<Value> {
        match (json, ty) {
            (serde_json::Value::Null, _) => Some(Value::Null),
            (serde_json::Value::Bool(b), _) => Some(Value::Boolean(*b)),
            (serde_json::Value::Number(n), PlyType::Number) => n.as_f64().map(Value::Number),
            (serde_json::Value::String(s), PlyType::Number) => s.parse().ok().map(Value::Number),
            (serde_json::Value::String(s), PlyType::Boolean) => match s.as_str() {
                "true" | "1" => Some(Value::Boolean(true)),
                "false" | "0" => Some(Value::Boolean(false)),
                _ => None,
            },
            (serde_json::Value::String(s), PlyType::Time) => {
                parse_time(s).map(Value::Time)
            }
            (serde_json::Value::String(s), _) => Some(Value::String(s.clone())),
            (serde_json::Value::Number(n), _) => n.as_f64().map(Value::Number),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Time(t) => f.write_str(&format_time(t)),
            Value::TimeRange(r) => write!(
                f,
                "[{}, {})",
                r.start.as_ref().map(format_time).unwrap_or_default(),
                r.end.as_ref().map(format_time).unwrap_or_default()
            ),
            Value::NumberRange(r) => write!(
                f,
                "[{}, {})",
                r.start.map(format_number).unwrap_or_default(),
                r.end.map(format_number).unwrap_or_default()
            ),
            Value::Set(s) => {
                f.write_str("{")?;
                for (i, e) in s.elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", e)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Integral values print without a fractional part, everything else via ryu.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let mut buffer = ryu::Buffer::new();
        buffer.format(n).to_string()
    }
}

/// JSON number for `n`, integral values as JSON integers.
pub fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
pub fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
