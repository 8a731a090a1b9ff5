//! Rendering expressions as SQL fragments.
//!
//! `SqlRenderer` walks a scalar or aggregate expression and asks the dialect
//! for every primitive without a portable spelling. Attribute references are
//! quoted identifiers; literals are escaped and inlined.

use tracing::trace;

use super::dialect::SqlDialect;
use crate::external::{CompileError, CompileResult, ExternalValue};
use crate::model::expr::and_all;
use crate::model::types::format_number;
use crate::model::{Expression, NumberRange, PlyType, TimeRange, Value};

pub struct SqlRenderer<'a> {
    dialect: &'a dyn SqlDialect,
    external: &'a ExternalValue,
}

impl<'a> SqlRenderer<'a> {
    pub fn new(dialect: &'a dyn SqlDialect, external: &'a ExternalValue) -> Self {
        Self { dialect, external }
    }

    pub fn dialect(&self) -> &'a dyn SqlDialect {
        self.dialect
    }

    pub fn identifier(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    /// SQL for a scalar, boolean or aggregate expression.
    pub fn render(&self, expr: &Expression) -> CompileResult<String> {
        trace!(op = expr.op_name(), "rendering sql");
        let d = self.dialect;
        let bin = |a: &Expression, op: &str, b: &Expression| -> CompileResult<String> {
            Ok(format!("({}{}{})", self.render(a)?, op, self.render(b)?))
        };
        Ok(match expr {
            Expression::Ref { name } => {
                if self.external.attribute(name).is_none() {
                    return Err(CompileError::UnknownAttribute(name.clone()));
                }
                self.identifier(name)
            }
            Expression::Literal { value } => self.literal(value)?,

            // aggregates
            Expression::Count { operand } => match self.aggregate_filter(operand)? {
                None => "COUNT(*)".into(),
                Some(f) => format!("SUM(CASE WHEN {} THEN 1 ELSE 0 END)", f),
            },
            Expression::Sum {
                operand,
                expression,
            } => format!("SUM({})", self.filtered(operand, expression, "0")?),
            Expression::Min {
                operand,
                expression,
            } => format!("MIN({})", self.filtered(operand, expression, d.format_null())?),
            Expression::Max {
                operand,
                expression,
            } => format!("MAX({})", self.filtered(operand, expression, d.format_null())?),
            Expression::Average {
                operand,
                expression,
            } => format!("AVG({})", self.filtered(operand, expression, d.format_null())?),
            Expression::CountDistinct {
                operand,
                expression,
            } => format!(
                "COUNT(DISTINCT {})",
                self.filtered(operand, expression, d.format_null())?
            ),
            Expression::CustomAggregate { custom, .. } => {
                return Err(CompileError::UnsupportedAggregate(format!(
                    "custom '{}' on {}",
                    custom,
                    d.name()
                )))
            }

            // arithmetic
            Expression::Add {
                operand,
                expression,
            } => bin(operand, "+", expression)?,
            Expression::Subtract {
                operand,
                expression,
            } => bin(operand, "-", expression)?,
            Expression::Multiply {
                operand,
                expression,
            } => bin(operand, "*", expression)?,
            Expression::Divide {
                operand,
                expression,
            } => bin(operand, "/", expression)?,
            Expression::Power {
                operand,
                expression,
            } => format!("POWER({},{})", self.render(operand)?, self.render(expression)?),
            Expression::Absolute { operand } => format!("ABS({})", self.render(operand)?),

            // boolean
            Expression::And { operands } => self.junction(operands, " AND ", true)?,
            Expression::Or { operands } => self.junction(operands, " OR ", false)?,
            Expression::Not { operand } => format!("NOT({})", self.render(operand)?),

            // comparison
            Expression::Is {
                operand,
                expression,
            } => d.is_not_distinct_from_expression(&self.render(operand)?, &self.render(expression)?),
            Expression::In {
                operand,
                expression,
            }
            | Expression::Overlap {
                operand,
                expression,
            } => self.membership(operand, expression)?,
            Expression::GreaterThan {
                operand,
                expression,
            } => bin(operand, ">", expression)?,
            Expression::GreaterThanOrEqual {
                operand,
                expression,
            } => bin(operand, ">=", expression)?,
            Expression::LessThan {
                operand,
                expression,
            } => bin(operand, "<", expression)?,
            Expression::LessThanOrEqual {
                operand,
                expression,
            } => bin(operand, "<=", expression)?,
            Expression::Contains {
                operand,
                expression,
                ignore_case,
            } => {
                let (a, b) = (self.render(operand)?, self.render(expression)?);
                if *ignore_case {
                    d.contains_expression(&format!("LOWER({})", a), &format!("LOWER({})", b))
                } else {
                    d.contains_expression(&a, &b)
                }
            }
            Expression::Match { operand, regexp } => {
                d.regexp_expression(&self.render(operand)?, regexp)
            }

            // strings
            Expression::Concat {
                operand,
                expression,
            } => d.concat_expression(&self.render(operand)?, &self.render(expression)?),
            Expression::Substr {
                operand,
                position,
                len,
            } => d.substr_expression(&self.render(operand)?, *position, *len),
            Expression::Extract { operand, regexp } => {
                d.extract_expression(&self.render(operand)?, regexp)
            }
            Expression::Fallback {
                operand,
                expression,
            } => format!(
                "COALESCE({}, {})",
                self.render(operand)?,
                self.render(expression)?
            ),
            Expression::IndexOf {
                operand,
                expression,
            } => d.index_of_expression(&self.render(operand)?, &self.render(expression)?),
            Expression::Lookup { lookup_fn, .. } => {
                return Err(CompileError::unsupported(format!(
                    "lookup '{}' on {}",
                    lookup_fn,
                    d.name()
                )))
            }

            // time
            Expression::TimeBucket {
                operand,
                duration,
                timezone,
            } => d.time_bucket_expression(
                &self.render(operand)?,
                duration,
                &timezone.unwrap_or_default(),
            )?,
            Expression::TimeFloor {
                operand,
                duration,
                timezone,
            } => d.time_floor_expression(
                &self.render(operand)?,
                duration,
                &timezone.unwrap_or_default(),
            )?,
            Expression::TimePart {
                operand,
                part,
                timezone,
            } => d.time_part_expression(&self.render(operand)?, *part, &timezone.unwrap_or_default())?,
            Expression::TimeShift {
                operand,
                duration,
                step,
                timezone,
            } => d.time_shift_expression(
                &self.render(operand)?,
                duration,
                *step,
                &timezone.unwrap_or_default(),
            ),

            Expression::NumberBucket {
                operand,
                size,
                offset,
            } => {
                let x = self.render(operand)?;
                let size = format_number(*size);
                if *offset == 0.0 {
                    format!("FLOOR({} / {}) * {}", x, size, size)
                } else {
                    let offset = format_number(*offset);
                    format!("FLOOR(({} - {}) / {}) * {} + {}", x, offset, size, size, offset)
                }
            }
            Expression::Cast {
                operand,
                output_type,
            } => {
                let from = operand.infer_type(&|n| self.external.attribute_type(n))?;
                d.cast_expression(from, &self.render(operand)?, *output_type)?
            }

            other => {
                return Err(CompileError::unsupported(format!(
                    "{} in a SQL expression",
                    other.op_name()
                )))
            }
        })
    }

    fn literal(&self, value: &Value) -> CompileResult<String> {
        let d = self.dialect;
        Ok(match value {
            Value::Null => d.format_null().into(),
            Value::Boolean(b) => d.format_bool(*b).into(),
            Value::Number(n) => d.format_number(*n),
            Value::String(s) => d.quote_string(s),
            Value::Time(t) => d.time_to_sql(Some(t)),
            other => {
                return Err(CompileError::unsupported(format!(
                    "{} literal outside a membership test",
                    other.ply_type()
                )))
            }
        })
    }

    fn junction(&self, operands: &[Expression], sep: &str, empty: bool) -> CompileResult<String> {
        if operands.is_empty() {
            return Ok(self.dialect.format_bool(empty).into());
        }
        let parts = operands
            .iter()
            .map(|o| self.render(o))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(format!("({})", parts.join(sep)))
    }

    /// `x IN (..)`, or range bounds for range literals.
    fn membership(&self, operand: &Expression, expression: &Expression) -> CompileResult<String> {
        let Some(value) = expression.as_literal() else {
            return Err(CompileError::unsupported(format!(
                "membership in a non-literal {}",
                expression.op_name()
            )));
        };
        let x = self.render(operand)?;
        match value {
            Value::TimeRange(range) => Ok(self.time_range(&x, range)),
            Value::NumberRange(range) => Ok(self.number_range(&x, range)),
            Value::Set(set) => {
                let mut scalars = Vec::new();
                let mut clauses = Vec::new();
                let mut has_null = false;
                for element in &set.elements {
                    match element {
                        Value::Null => has_null = true,
                        Value::TimeRange(r) => clauses.push(self.time_range(&x, r)),
                        Value::NumberRange(r) => clauses.push(self.number_range(&x, r)),
                        other => scalars.push(self.literal(other)?),
                    }
                }
                if !scalars.is_empty() {
                    clauses.insert(0, format!("{} IN ({})", x, scalars.join(",")));
                }
                if has_null {
                    clauses.push(format!("{} IS {}", x, self.dialect.format_null()));
                }
                Ok(match clauses.len() {
                    0 => self.dialect.format_bool(false).into(),
                    1 => clauses.remove(0),
                    _ => format!("({})", clauses.join(" OR ")),
                })
            }
            other => Ok(self
                .dialect
                .is_not_distinct_from_expression(&x, &self.literal(other)?)),
        }
    }

    /// Rows of `attr` inside any of `ranges`; no ranges matches nothing.
    pub fn time_ranges(&self, attr: &str, ranges: &[TimeRange]) -> String {
        let x = self.identifier(attr);
        let clauses: Vec<String> = ranges.iter().map(|r| self.time_range(&x, r)).collect();
        match clauses.len() {
            0 => self.dialect.format_bool(false).into(),
            1 => clauses.join(""),
            _ => format!("({})", clauses.join(" OR ")),
        }
    }

    fn time_range(&self, x: &str, range: &TimeRange) -> String {
        let d = self.dialect;
        let bounds = [
            range.start.map(|s| format!("{}<={}", d.time_to_sql(Some(&s)), x)),
            range.end.map(|e| format!("{}<{}", x, d.time_to_sql(Some(&e)))),
        ];
        self.bounds(bounds)
    }

    fn number_range(&self, x: &str, range: &NumberRange) -> String {
        let d = self.dialect;
        let bounds = [
            range.start.map(|s| format!("{}<={}", d.format_number(s), x)),
            range.end.map(|e| format!("{}<{}", x, d.format_number(e))),
        ];
        self.bounds(bounds)
    }

    fn bounds(&self, bounds: [Option<String>; 2]) -> String {
        let present: Vec<String> = bounds.into_iter().flatten().collect();
        match present.len() {
            0 => self.dialect.format_bool(true).into(),
            1 => format!("({})", present[0]),
            _ => format!("({})", present.join(" AND ")),
        }
    }

    /// The `CASE WHEN` condition of a filtered aggregate, `None` when unfiltered.
    fn aggregate_filter(&self, operand: &Expression) -> CompileResult<Option<String>> {
        let filters = match operand.dataset_chain() {
            Some((_, filters)) => filters.into_iter().cloned().collect::<Vec<_>>(),
            None => {
                return Err(CompileError::unsupported(format!(
                    "aggregate over {}",
                    operand.op_name()
                )))
            }
        };
        let filter = and_all(filters);
        if filter.is_literal_true() {
            return Ok(None);
        }
        self.render(&filter).map(Some)
    }

    fn filtered(&self, operand: &Expression, expression: &Expression, otherwise: &str) -> CompileResult<String> {
        let value = self.render(expression)?;
        Ok(match self.aggregate_filter(operand)? {
            None => value,
            Some(f) => format!("CASE WHEN {} THEN {} ELSE {} END", f, value, otherwise),
        })
    }

    /// Type of `expr` against the declared attributes.
    pub fn infer(&self, expr: &Expression) -> CompileResult<PlyType> {
        Ok(expr.infer_type(&|n| self.external.attribute_type(n))?)
    }
}
