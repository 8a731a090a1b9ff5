//! Translating boolean expressions into Druid filters.

use super::extraction::{dimension_source, DimensionSource, TIME_DIMENSION};
use super::javascript::dimension_function;
use super::query::{Filter, SearchQuerySpec};
use crate::external::time_filter::druid_interval;
use crate::external::{CompileError, CompileResult, ExternalValue};
use crate::model::types::format_number;
use crate::model::{Expression, NumberRange, PlyType, TimeRange, Value};

/// Where a filter ends up. Aggregator filters spell substring matches as an
/// extraction on `"true"` rather than a bare javascript filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterContext {
    Query,
    Aggregator,
}

pub struct FilterBuilder<'a> {
    external: &'a ExternalValue,
    context: FilterContext,
}

impl<'a> FilterBuilder<'a> {
    pub fn new(external: &'a ExternalValue, context: FilterContext) -> Self {
        Self { external, context }
    }

    /// `None` for a filter that keeps every row.
    pub fn build(&self, expr: &Expression) -> CompileResult<Option<Filter>> {
        if expr.is_literal_true() {
            return Ok(None);
        }
        self.filter(expr).map(Some)
    }

    fn filter(&self, expr: &Expression) -> CompileResult<Filter> {
        match expr {
            Expression::Literal {
                value: Value::Boolean(b),
            } => Ok(constant(*b)),
            Expression::And { operands } => Ok(Filter::And {
                fields: self.all(operands)?,
            }),
            Expression::Or { operands } => Ok(Filter::Or {
                fields: self.all(operands)?,
            }),
            Expression::Not { operand } => Ok(Filter::Not {
                field: Box::new(self.filter(operand)?),
            }),
            Expression::Ref { name } => self.matches_value(expr, &Value::Boolean(true)).or_else(
                |_| Err(CompileError::unsupported(format!("${} as a filter", name))),
            ),

            Expression::Is {
                operand,
                expression,
            } => {
                let value = literal(expression)?;
                if self.is_time(operand) {
                    if let Value::Time(t) = value {
                        return Ok(self.interval(&[TimeRange::instant(*t)]));
                    }
                }
                self.matches_value(operand, value)
            }
            Expression::In {
                operand,
                expression,
            }
            | Expression::Overlap {
                operand,
                expression,
            } => match literal(expression)? {
                Value::Set(set) => {
                    let ranges: Option<Vec<TimeRange>> = set
                        .elements
                        .iter()
                        .map(|e| match e {
                            Value::TimeRange(r) => Some(r.clone()),
                            _ => None,
                        })
                        .collect();
                    if let (true, Some(ranges)) = (self.is_time(operand), ranges) {
                        return Ok(self.interval(&ranges));
                    }
                    let mut fields = set
                        .elements
                        .iter()
                        .map(|v| self.matches_value(operand, v))
                        .collect::<CompileResult<Vec<_>>>()?;
                    Ok(match fields.len() {
                        0 => constant(false),
                        1 => fields.remove(0),
                        _ => Filter::Or { fields },
                    })
                }
                Value::TimeRange(range) if self.is_time(operand) => {
                    Ok(self.interval(std::slice::from_ref(range)))
                }
                Value::NumberRange(NumberRange { start, end }) => self.bound(
                    operand,
                    start.map(format_number),
                    false,
                    end.map(format_number),
                    true,
                    "numeric",
                ),
                other => self.matches_value(operand, other),
            },

            Expression::GreaterThan {
                operand,
                expression,
            } => self.comparison(operand, expression, true, true),
            Expression::GreaterThanOrEqual {
                operand,
                expression,
            } => self.comparison(operand, expression, true, false),
            Expression::LessThan {
                operand,
                expression,
            } => self.comparison(operand, expression, false, true),
            Expression::LessThanOrEqual {
                operand,
                expression,
            } => self.comparison(operand, expression, false, false),

            Expression::Contains {
                operand,
                expression,
                ignore_case: true,
            } => {
                let dimension = self.plain_dimension(operand)?;
                let needle = literal(expression)?
                    .to_native_string()
                    .ok_or_else(|| CompileError::unsupported("contains null"))?;
                Ok(Filter::Search {
                    dimension,
                    query: SearchQuerySpec::Fragment {
                        values: vec![needle],
                    },
                })
            }
            Expression::Contains { operand, .. } => self.javascript(expr, operand),

            Expression::Match { operand, regexp } => match operand.as_ref() {
                Expression::Ref { .. } => Ok(Filter::Regex {
                    dimension: self.plain_dimension(operand)?,
                    pattern: regexp.clone(),
                }),
                _ => self.javascript(expr, operand),
            },

            other => {
                let attr = single_attribute(other).ok_or_else(|| {
                    CompileError::unsupported(format!("{} as a filter", other.op_name()))
                })?;
                self.javascript(other, &crate::model::r(&attr))
            }
        }
    }

    fn all(&self, operands: &[Expression]) -> CompileResult<Vec<Filter>> {
        operands.iter().map(|o| self.filter(o)).collect()
    }

    fn is_time(&self, operand: &Expression) -> bool {
        operand
            .as_ref_name()
            .is_some_and(|n| self.external.is_time_attribute(n))
    }

    /// Rows where `operand` evaluates to `value`.
    fn matches_value(&self, operand: &Expression, value: &Value) -> CompileResult<Filter> {
        let value = match value {
            Value::Null => None,
            other => Some(other.to_native_string().ok_or_else(|| {
                CompileError::unsupported(format!("{} compared in a filter", other.ply_type()))
            })?),
        };
        let source = match operand {
            Expression::Ref { name } if !self.external.is_time_attribute(name) => {
                DimensionSource {
                    dimension: self.plain_dimension(operand)?,
                    extraction_fn: None,
                }
            }
            _ => dimension_source(operand, self.external)?,
        };
        Ok(match source.extraction_fn {
            None => Filter::Selector {
                dimension: source.dimension,
                value,
            },
            Some(extraction_fn) => Filter::Extraction {
                dimension: source.dimension,
                value,
                extraction_fn,
            },
        })
    }

    fn comparison(
        &self,
        operand: &Expression,
        expression: &Expression,
        greater: bool,
        strict: bool,
    ) -> CompileResult<Filter> {
        let value = literal(expression)?;
        if self.is_time(operand) {
            if let Value::Time(t) = value {
                let one_ms = chrono::Duration::milliseconds(1);
                let range = match (greater, strict) {
                    (true, true) => TimeRange {
                        start: Some(*t + one_ms),
                        end: None,
                    },
                    (true, false) => TimeRange {
                        start: Some(*t),
                        end: None,
                    },
                    (false, true) => TimeRange {
                        start: None,
                        end: Some(*t),
                    },
                    (false, false) => TimeRange {
                        start: None,
                        end: Some(*t + one_ms),
                    },
                };
                return Ok(self.interval(&[range]));
            }
        }
        let ordering = if value.ply_type() == PlyType::Number {
            "numeric"
        } else {
            "lexicographic"
        };
        let bound = value
            .to_native_string()
            .ok_or_else(|| CompileError::unsupported("comparison with null"))?;
        if greater {
            self.bound(operand, Some(bound), strict, None, false, ordering)
        } else {
            self.bound(operand, None, false, Some(bound), strict, ordering)
        }
    }

    fn bound(
        &self,
        operand: &Expression,
        lower: Option<String>,
        lower_strict: bool,
        upper: Option<String>,
        upper_strict: bool,
        ordering: &str,
    ) -> CompileResult<Filter> {
        Ok(Filter::Bound {
            dimension: self.plain_dimension(operand)?,
            lower_strict: lower_strict && lower.is_some(),
            upper_strict: upper_strict && upper.is_some(),
            lower,
            upper,
            ordering: ordering.into(),
        })
    }

    fn interval(&self, ranges: &[TimeRange]) -> Filter {
        Filter::Interval {
            dimension: TIME_DIMENSION.into(),
            intervals: ranges.iter().map(druid_interval).collect(),
        }
    }

    /// A predicate Druid has no native form for, evaluated per value.
    fn javascript(&self, predicate: &Expression, operand: &Expression) -> CompileResult<Filter> {
        let attr = single_attribute(operand)
            .ok_or_else(|| CompileError::unsupported("javascript filter over several attributes"))?;
        let dimension = self.plain_dimension(&crate::model::r(&attr))?;
        let function = dimension_function(predicate, &attr)?;
        Ok(match self.context {
            FilterContext::Query => Filter::Javascript {
                dimension,
                function,
            },
            FilterContext::Aggregator => Filter::Extraction {
                dimension,
                value: Some("true".into()),
                extraction_fn: super::query::ExtractionFn::Javascript {
                    function,
                    injective: None,
                },
            },
        })
    }

    fn plain_dimension(&self, operand: &Expression) -> CompileResult<String> {
        let name = operand.as_ref_name().ok_or_else(|| {
            CompileError::unsupported(format!("{} where an attribute is required", operand.op_name()))
        })?;
        if self.external.attribute(name).is_none() {
            return Err(CompileError::UnknownAttribute(name.into()));
        }
        Ok(if self.external.is_time_attribute(name) {
            TIME_DIMENSION.into()
        } else {
            name.into()
        })
    }
}

fn literal(expr: &Expression) -> CompileResult<&Value> {
    expr.as_literal().ok_or_else(|| {
        CompileError::unsupported(format!("comparison with a non-literal {}", expr.op_name()))
    })
}

fn single_attribute(expr: &Expression) -> Option<String> {
    let refs = expr.references();
    if refs.len() == 1 {
        refs.into_iter().next()
    } else {
        None
    }
}

/// Druid has no boolean constant filter.
fn constant(keep: bool) -> Filter {
    let always_false = Filter::Javascript {
        dimension: TIME_DIMENSION.into(),
        function: "function(d){return false;}".into(),
    };
    if keep {
        Filter::Not {
            field: Box::new(always_false),
        }
    } else {
        always_false
    }
}
