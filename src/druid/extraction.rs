//! Mapping scalar expressions onto a Druid dimension and extraction function.

use std::collections::BTreeMap;

use super::javascript::{
    dimension_function, number_bucket_function, range_bucket_function,
};
use super::query::{DimensionSpec, ExtractionFn, LookupSpec};
use crate::external::{CompileError, CompileResult, ExternalValue};
use crate::model::{AttributeSpecial, Duration, Expression, PlyType, TimePart, Timezone, Value};

/// Druid's name for the primary timestamp column.
pub const TIME_DIMENSION: &str = "__time";

const LOCALE: &str = "en-US";

/// A dimension read, optionally through an extraction function.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionSource {
    pub dimension: String,
    pub extraction_fn: Option<ExtractionFn>,
}

impl DimensionSource {
    fn plain(dimension: &str) -> Self {
        Self {
            dimension: dimension.into(),
            extraction_fn: None,
        }
    }

    fn extracted(dimension: &str, extraction_fn: ExtractionFn) -> Self {
        Self {
            dimension: dimension.into(),
            extraction_fn: Some(extraction_fn),
        }
    }

    pub fn into_dimension_spec(self, output_name: &str) -> DimensionSpec {
        match self.extraction_fn {
            None => DimensionSpec::Default {
                dimension: self.dimension,
                output_name: output_name.into(),
            },
            Some(extraction_fn) => DimensionSpec::Extraction {
                dimension: self.dimension,
                output_name: output_name.into(),
                extraction_fn,
            },
        }
    }
}

/// Resolve `expr` (a split key or the operand of a filter) to a dimension.
pub fn dimension_source(expr: &Expression, external: &ExternalValue) -> CompileResult<DimensionSource> {
    match expr {
        Expression::Ref { name } => attribute_source(name, external),

        Expression::Extract { operand, regexp } => {
            let dimension = plain_attribute(operand, external)?;
            Ok(DimensionSource::extracted(
                &dimension,
                ExtractionFn::Regex {
                    expr: regexp.clone(),
                    replace_missing_value: true,
                    replace_missing_value_with: None,
                },
            ))
        }
        Expression::Fallback {
            operand,
            expression,
        } if matches!(operand.as_ref(), Expression::Extract { .. }) => {
            let mut source = dimension_source(operand, external)?;
            let with = expression.as_literal().and_then(Value::to_native_string);
            if let Some(ExtractionFn::Regex {
                replace_missing_value_with,
                ..
            }) = &mut source.extraction_fn
            {
                *replace_missing_value_with = with;
            }
            Ok(source)
        }
        Expression::Substr {
            operand,
            position,
            len,
        } => {
            let dimension = plain_attribute(operand, external)?;
            Ok(DimensionSource::extracted(
                &dimension,
                ExtractionFn::Substring {
                    index: *position,
                    length: Some(*len),
                },
            ))
        }
        Expression::Lookup { operand, lookup_fn } => {
            let dimension = plain_attribute(operand, external)?;
            let lookup = match external.lookup(lookup_fn) {
                Some(map) => LookupSpec::Map { map: map.clone() },
                None => LookupSpec::Namespace {
                    namespace: lookup_fn.clone(),
                },
            };
            Ok(DimensionSource::extracted(
                &dimension,
                ExtractionFn::Lookup {
                    lookup,
                    replace_missing_value_with: None,
                },
            ))
        }
        Expression::TimePart {
            operand,
            part,
            timezone,
        } => {
            require_time_attribute(operand, external)?;
            let format = time_part_format(*part).ok_or(CompileError::UnsupportedTimePart(*part))?;
            Ok(time_format(format, timezone))
        }
        Expression::TimeBucket {
            operand,
            duration,
            timezone,
        }
        | Expression::TimeFloor {
            operand,
            duration,
            timezone,
        } => {
            require_time_attribute(operand, external)?;
            let format = bucket_format(duration)
                .ok_or_else(|| CompileError::UnsupportedDuration(duration.to_string()))?;
            Ok(time_format(format, timezone))
        }
        Expression::NumberBucket {
            operand,
            size,
            offset,
        } => {
            let dimension = plain_attribute(operand, external)?;
            let function = match external.attribute(&dimension).and_then(|a| a.special.as_ref()) {
                Some(AttributeSpecial::Range {
                    separator,
                    range_size,
                    digits_after_decimal,
                }) => range_bucket_function(
                    separator,
                    *range_size,
                    *digits_after_decimal,
                    Some((*size, *offset)),
                ),
                _ => number_bucket_function(*size, *offset),
            };
            Ok(javascript(&dimension, function, None))
        }
        other => {
            let references = other.references();
            let mut attributes = references.iter().filter(|r| external.attribute(r).is_some());
            let (Some(dimension), None) = (attributes.next(), attributes.next()) else {
                return Err(CompileError::unsupported(format!(
                    "{} over {} attributes",
                    other.op_name(),
                    references.len()
                )));
            };
            if external.is_time_attribute(dimension) {
                return Err(CompileError::unsupported(format!(
                    "{} of the time attribute",
                    other.op_name()
                )));
            }
            let injective = matches!(other, Expression::Concat { .. }).then_some(true);
            let function = dimension_function(other, dimension)?;
            Ok(javascript(dimension, function, injective))
        }
    }
}

fn attribute_source(name: &str, external: &ExternalValue) -> CompileResult<DimensionSource> {
    let attr = external
        .attribute(name)
        .ok_or_else(|| CompileError::UnknownAttribute(name.into()))?;
    if external.is_time_attribute(name) {
        return Ok(DimensionSource::plain(TIME_DIMENSION));
    }
    if let Some(AttributeSpecial::Range {
        separator,
        range_size,
        digits_after_decimal,
    }) = &attr.special
    {
        let function = range_bucket_function(separator, *range_size, *digits_after_decimal, None);
        return Ok(javascript(name, function, None));
    }
    if attr.ply_type == PlyType::Boolean {
        return Ok(DimensionSource::extracted(
            name,
            ExtractionFn::Lookup {
                lookup: LookupSpec::Map {
                    map: boolean_map(),
                },
                replace_missing_value_with: None,
            },
        ));
    }
    Ok(DimensionSource::plain(name))
}

fn boolean_map() -> BTreeMap<String, String> {
    [("0", "false"), ("1", "true"), ("false", "false"), ("true", "true")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn plain_attribute(operand: &Expression, external: &ExternalValue) -> CompileResult<String> {
    let name = operand.as_ref_name().ok_or_else(|| {
        CompileError::unsupported(format!("nested {} in a dimension", operand.op_name()))
    })?;
    if external.attribute(name).is_none() {
        return Err(CompileError::UnknownAttribute(name.into()));
    }
    Ok(name.to_string())
}

fn require_time_attribute(operand: &Expression, external: &ExternalValue) -> CompileResult<()> {
    match operand.as_ref_name() {
        Some(name) if external.is_time_attribute(name) => Ok(()),
        _ => Err(CompileError::unsupported(
            "time functions on anything but the time attribute",
        )),
    }
}

fn javascript(dimension: &str, function: String, injective: Option<bool>) -> DimensionSource {
    DimensionSource::extracted(
        dimension,
        ExtractionFn::Javascript {
            function,
            injective,
        },
    )
}

fn time_format(format: &str, timezone: &Option<Timezone>) -> DimensionSource {
    DimensionSource::extracted(
        TIME_DIMENSION,
        ExtractionFn::TimeFormat {
            format: format.into(),
            locale: LOCALE.into(),
            time_zone: timezone.unwrap_or_default().name().into(),
        },
    )
}

/// Joda format printing a time part, where Druid has one.
pub fn time_part_format(part: TimePart) -> Option<&'static str> {
    Some(match part {
        TimePart::SecondOfMinute => "s",
        TimePart::SecondOfDay => "H'*60+'m'*60+'s",
        TimePart::MinuteOfHour => "m",
        TimePart::HourOfDay => "H",
        TimePart::DayOfWeek => "e",
        TimePart::DayOfMonth => "d",
        TimePart::DayOfYear => "D",
        TimePart::WeekOfYear => "w",
        TimePart::MonthOfYear => "M",
        TimePart::Year => "Y",
        _ => return None,
    })
}

/// Joda format printing the start of a bucket as an ISO timestamp.
pub fn bucket_format(duration: &Duration) -> Option<&'static str> {
    use crate::model::DurationUnit;
    Some(match duration.single_unit()? {
        (DurationUnit::Second, 1) => "yyyy-MM-dd'T'HH:mm:ss'Z",
        (DurationUnit::Minute, 1) => "yyyy-MM-dd'T'HH:mm'Z",
        (DurationUnit::Hour, 1) => "yyyy-MM-dd'T'HH':00Z",
        (DurationUnit::Day, 1) => "yyyy-MM-dd'Z",
        (DurationUnit::Month, 1) => "yyyy-MM'-01Z",
        (DurationUnit::Year, 1) => "yyyy'-01-01Z",
        _ => return None,
    })
}
