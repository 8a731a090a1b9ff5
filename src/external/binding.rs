//! Binding nested applies to the split keys of one parent row.
//!
//! A nested apply runs once per parent row. Its split operand is narrowed
//! with one predicate per parent key: bucketed keys become range membership
//! so the filter stays pushable (and time buckets lift into intervals),
//! every other key becomes equality.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use tracing::trace;

use super::{CompileError, CompileResult, ExternalValue, Row};
use crate::model::expr::{and_all, lit};
use crate::model::types::{format_time, number_to_json, parse_time};
use crate::model::{Expression, NumberRange, PlyType, TimeRange, Timezone, Value};

/// Instant every simulated time key is derived from.
pub fn simulation_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015, 3, 14, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

const SIMULATED_NUMBER: f64 = 4.0;

/// Add the key predicates of `row` to the split operand of `nested`.
pub fn bind(
    nested: &Expression,
    keys: &BTreeMap<String, Expression>,
    row: &Row,
    external: &ExternalValue,
) -> CompileResult<Expression> {
    let mut predicates = Vec::with_capacity(keys.len());
    for (name, key) in keys {
        let json = row.get(name).unwrap_or(&serde_json::Value::Null);
        predicates.push(key_predicate(key, json, external)?);
    }
    let predicate = and_all(predicates);
    trace!(keys = keys.len(), "binding nested apply");
    if predicate.is_literal_true() {
        return Ok(nested.clone());
    }
    let mut out = nested.clone();
    narrow_split_operand(&mut out, predicate);
    Ok(out)
}

fn narrow_split_operand(expr: &mut Expression, predicate: Expression) {
    match expr {
        Expression::Split { operand, .. } => {
            let inner = std::mem::replace(operand.as_mut(), Expression::Ply);
            **operand = inner.filter(predicate);
        }
        Expression::Filter { operand, .. }
        | Expression::Apply { operand, .. }
        | Expression::Sort { operand, .. }
        | Expression::Limit { operand, .. } => narrow_split_operand(operand, predicate),
        other => {
            let inner = std::mem::replace(other, Expression::Ply);
            *other = inner.filter(predicate);
        }
    }
}

/// The predicate selecting rows whose `key` evaluates to `json`.
pub fn key_predicate(
    key: &Expression,
    json: &serde_json::Value,
    external: &ExternalValue,
) -> CompileResult<Expression> {
    Ok(match key {
        Expression::TimeBucket {
            operand,
            duration,
            timezone,
        } => {
            let start = json_time(json).ok_or_else(|| bad_key_value(key, json))?;
            let tz = timezone.unwrap_or_default();
            let end = duration
                .shift(start, &tz, 1)
                .ok_or_else(|| CompileError::UnsupportedDuration(duration.to_string()))?;
            (**operand)
                .clone()
                .is_in(lit(Value::TimeRange(TimeRange::new(start, end))))
        }
        Expression::NumberBucket { operand, size, .. } => {
            let start = json.as_f64().ok_or_else(|| bad_key_value(key, json))?;
            (**operand)
                .clone()
                .is_in(lit(Value::NumberRange(NumberRange::new(start, start + size))))
        }
        other => {
            let ty = other.infer_type(&|n| external.attribute_type(n))?;
            let value = Value::from_json(json, ty).ok_or_else(|| bad_key_value(key, json))?;
            other.clone().is(lit(value))
        }
    })
}

fn bad_key_value(key: &Expression, json: &serde_json::Value) -> CompileError {
    CompileError::unsupported(format!("value {} for split key {}", json, key.op_name()))
}

fn json_time(json: &serde_json::Value) -> Option<DateTime<Utc>> {
    match json {
        serde_json::Value::String(s) => parse_time(s),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// A plausible parent row used to render nested queries without a backend.
pub fn simulated_row(
    keys: &BTreeMap<String, Expression>,
    external: &ExternalValue,
) -> CompileResult<Row> {
    let mut row = Row::new();
    for (name, key) in keys {
        row.insert(name.clone(), simulated_value(name, key, external)?);
    }
    Ok(row)
}

fn simulated_value(
    name: &str,
    key: &Expression,
    external: &ExternalValue,
) -> CompileResult<serde_json::Value> {
    let floored = |duration: &crate::model::Duration, timezone: &Option<Timezone>| {
        duration
            .floor(simulation_time(), &timezone.unwrap_or_default())
            .map(|t| serde_json::Value::String(format_time(&t)))
            .ok_or_else(|| CompileError::UnsupportedDuration(duration.to_string()))
    };
    match key {
        Expression::TimeBucket {
            duration, timezone, ..
        }
        | Expression::TimeFloor {
            duration, timezone, ..
        } => floored(duration, timezone),
        Expression::NumberBucket { size, offset, .. } => Ok(number_to_json(
            ((SIMULATED_NUMBER - offset) / size).floor() * size + offset,
        )),
        other => {
            let ty = other.infer_type(&|n| external.attribute_type(n))?;
            Ok(match ty {
                PlyType::Number => number_to_json(SIMULATED_NUMBER),
                PlyType::Boolean => serde_json::Value::Bool(true),
                PlyType::Time => serde_json::Value::String(format_time(&simulation_time())),
                _ => {
                    let base = other
                        .references()
                        .into_iter()
                        .find(|r| external.attribute(r).is_some())
                        .unwrap_or_else(|| name.to_lowercase());
                    serde_json::Value::String(format!("some_{}", base))
                }
            })
        }
    }
}
