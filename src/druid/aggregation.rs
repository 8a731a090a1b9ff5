//! Aggregators, post-aggregators and having specs.

use tracing::trace;

use super::extraction::TIME_DIMENSION;
use super::filter::{FilterBuilder, FilterContext};
use super::javascript::to_js;
use super::query::{Aggregation, HavingSpec, NativeAggregation, PostAggregation};
use crate::external::aggregate::{AggregateSet, NamedAggregate};
use crate::external::{CompileError, CompileResult, ExternalValue};
use crate::model::expr::and_all;
use crate::model::types::number_to_json;
use crate::model::{Expression, Value};

/// Name of the placeholder aggregator for queries that request none.
pub const DUMMY_NAME: &str = "!DUMMY";

pub struct AggregationBuilder<'a> {
    external: &'a ExternalValue,
    set: &'a AggregateSet,
}

impl<'a> AggregationBuilder<'a> {
    pub fn new(external: &'a ExternalValue, set: &'a AggregateSet) -> Self {
        Self { external, set }
    }

    /// One aggregator per named aggregate, in order; `!DUMMY` when there are none.
    pub fn aggregations(&self) -> CompileResult<Vec<Aggregation>> {
        if self.set.aggregates.is_empty() {
            return Ok(vec![Aggregation::Native(NativeAggregation::Count {
                name: DUMMY_NAME.into(),
            })]);
        }
        self.set
            .aggregates
            .iter()
            .map(|a| self.aggregation(a))
            .collect()
    }

    pub fn post_aggregations(&self) -> CompileResult<Vec<PostAggregation>> {
        self.set
            .post_aggregates
            .iter()
            .map(|p| Ok(self.post_aggregation(&p.expression)?.with_name(&p.name)))
            .collect()
    }

    fn aggregation(&self, named: &NamedAggregate) -> CompileResult<Aggregation> {
        let expr = &named.expression;
        let name = named.name.clone();
        trace!(aggregate = %name, op = expr.op_name(), "lowering aggregate");
        let operand = expr
            .aggregate_operand()
            .ok_or_else(|| CompileError::UnsupportedAggregate(expr.op_name().into()))?;
        let filters = operand
            .dataset_chain()
            .map(|(_, filters)| filters.into_iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();

        let aggregator = self.bare_aggregation(expr, &name)?;
        if filters.is_empty() {
            return Ok(aggregator);
        }
        let filter = FilterBuilder::new(self.external, FilterContext::Aggregator)
            .build(&and_all(filters))?;
        Ok(match filter {
            None => aggregator,
            Some(filter) => Aggregation::Native(NativeAggregation::Filtered {
                name,
                filter,
                aggregator: Box::new(aggregator),
            }),
        })
    }

    fn bare_aggregation(&self, expr: &Expression, name: &str) -> CompileResult<Aggregation> {
        let name = name.to_string();
        let native = match expr {
            Expression::Count { .. } => NativeAggregation::Count { name },
            Expression::Sum { expression, .. } => match self.field(expression)? {
                Some(field) if field == TIME_DIMENSION => {
                    return Err(CompileError::UnsupportedAggregate("sum of time".into()))
                }
                Some(field_name) => NativeAggregation::DoubleSum { name, field_name },
                None => javascript_aggregation(name, expression, JsFold::Sum)?,
            },
            Expression::Min { expression, .. } => match self.field(expression)? {
                Some(field) if field == TIME_DIMENSION => NativeAggregation::LongMin {
                    name,
                    field_name: field,
                },
                Some(field_name) => NativeAggregation::DoubleMin { name, field_name },
                None => javascript_aggregation(name, expression, JsFold::Min)?,
            },
            Expression::Max { expression, .. } => match self.field(expression)? {
                Some(field) if field == TIME_DIMENSION => NativeAggregation::LongMax {
                    name,
                    field_name: field,
                },
                Some(field_name) => NativeAggregation::DoubleMax { name, field_name },
                None => javascript_aggregation(name, expression, JsFold::Max)?,
            },
            Expression::CountDistinct { expression, .. } => {
                let attr = expression.as_ref_name().ok_or_else(|| {
                    CompileError::UnsupportedAggregate(format!(
                        "countDistinct of {}",
                        expression.op_name()
                    ))
                })?;
                let info = self
                    .external
                    .attribute(attr)
                    .ok_or_else(|| CompileError::UnknownAttribute(attr.into()))?;
                if info.is_unique() {
                    NativeAggregation::HyperUnique {
                        name,
                        field_name: attr.into(),
                    }
                } else {
                    NativeAggregation::Cardinality {
                        name,
                        field_names: vec![attr.into()],
                        by_row: true,
                    }
                }
            }
            Expression::CustomAggregate { custom, .. } => {
                let raw = self
                    .external
                    .custom_aggregation(custom)
                    .ok_or_else(|| CompileError::UnsupportedAggregate(format!("custom '{}'", custom)))?;
                let mut raw = raw.clone();
                match &mut raw {
                    serde_json::Value::Object(map) => {
                        map.insert("name".into(), serde_json::Value::String(name));
                    }
                    _ => {
                        return Err(CompileError::InvalidConfig(format!(
                            "custom aggregation '{}' is not an object",
                            custom
                        )))
                    }
                }
                return Ok(Aggregation::Custom(raw));
            }
            other => return Err(CompileError::UnsupportedAggregate(other.op_name().into())),
        };
        Ok(Aggregation::Native(native))
    }

    /// The column a plain attribute reference reads, `None` for derived values.
    fn field(&self, expr: &Expression) -> CompileResult<Option<String>> {
        let Some(name) = expr.as_ref_name() else {
            return Ok(None);
        };
        if self.external.attribute(name).is_none() {
            return Err(CompileError::UnknownAttribute(name.into()));
        }
        Ok(Some(if self.external.is_time_attribute(name) {
            TIME_DIMENSION.into()
        } else {
            name.into()
        }))
    }

    fn post_aggregation(&self, expr: &Expression) -> CompileResult<PostAggregation> {
        let arithmetic = |func: &str, a: &Expression, b: &Expression| -> CompileResult<PostAggregation> {
            Ok(PostAggregation::Arithmetic {
                name: None,
                func: func.into(),
                fields: vec![self.post_aggregation(a)?, self.post_aggregation(b)?],
            })
        };
        match expr {
            Expression::Ref { name } => Ok(self.access(name)),
            Expression::Literal {
                value: Value::Number(n),
            } => Ok(PostAggregation::Constant {
                name: None,
                value: number_to_json(*n),
            }),
            Expression::Add {
                operand,
                expression,
            } => arithmetic("+", operand, expression),
            Expression::Subtract {
                operand,
                expression,
            } => arithmetic("-", operand, expression),
            Expression::Multiply {
                operand,
                expression,
            } => arithmetic("*", operand, expression),
            Expression::Divide {
                operand,
                expression,
            } => arithmetic("/", operand, expression),
            other => {
                let field_names: Vec<String> = other.references().into_iter().collect();
                let body = to_js(other, &|name| {
                    field_names
                        .iter()
                        .position(|f| f == name)
                        .map(|i| format!("_{}", i))
                        .ok_or_else(|| CompileError::unsupported(format!("${} in a post aggregation", name)))
                })?;
                let params: Vec<String> = (0..field_names.len()).map(|i| format!("_{}", i)).collect();
                Ok(PostAggregation::Javascript {
                    name: None,
                    function: format!("function({}) {{ return {}; }}", params.join(","), body),
                    field_names,
                })
            }
        }
    }

    fn access(&self, name: &str) -> PostAggregation {
        let distinct = self
            .set
            .aggregate(name)
            .is_some_and(|a| matches!(a.expression, Expression::CountDistinct { .. }));
        if distinct {
            PostAggregation::HyperUniqueCardinality {
                name: None,
                field_name: name.into(),
            }
        } else {
            PostAggregation::FieldAccess {
                name: None,
                field_name: name.into(),
            }
        }
    }
}

#[derive(Clone, Copy)]
enum JsFold {
    Sum,
    Min,
    Max,
}

/// A JavaScript aggregator folding a derived expression over its fields.
fn javascript_aggregation(
    name: String,
    expr: &Expression,
    fold: JsFold,
) -> CompileResult<NativeAggregation> {
    let field_names: Vec<String> = expr.references().into_iter().collect();
    // Columns bind positionally; names like `a-b` or `class` are not JS identifiers.
    let value = to_js(expr, &|n| {
        field_names
            .iter()
            .position(|f| f == n)
            .map(|i| format!("_{}", i))
            .ok_or_else(|| CompileError::unsupported(format!("${} in a javascript aggregator", n)))
    })?;
    let params: Vec<String> = (0..field_names.len()).map(|i| format!("_{}", i)).collect();
    let (step, combine, reset) = match fold {
        JsFold::Sum => (format!("_c+{}", value), "a+b", "0"),
        JsFold::Min => (format!("Math.min(_c,{})", value), "Math.min(a,b)", "Infinity"),
        JsFold::Max => (format!("Math.max(_c,{})", value), "Math.max(a,b)", "-Infinity"),
    };
    Ok(NativeAggregation::Javascript {
        name,
        fn_aggregate: format!(
            "function(_c,{}) {{ return {}; }}",
            params.join(","),
            step
        ),
        fn_combine: format!("function(a,b) {{ return {}; }}", combine),
        fn_reset: format!("function() {{ return {}; }}", reset),
        field_names,
    })
}

// ============================================================================
// Having
// ============================================================================

/// A having spec over aggregate output names.
pub fn having_spec(expr: &Expression) -> CompileResult<HavingSpec> {
    let compare = |operand: &Expression, value: &Expression| -> CompileResult<(String, serde_json::Value)> {
        let aggregation = operand
            .as_ref_name()
            .ok_or_else(|| CompileError::UnsupportedHaving(format!("{} on the left", operand.op_name())))?;
        match value.as_literal() {
            Some(Value::Number(n)) => Ok((aggregation.into(), number_to_json(*n))),
            _ => Err(CompileError::UnsupportedHaving(format!(
                "comparison of ${} with {}",
                aggregation,
                value.op_name()
            ))),
        }
    };
    Ok(match expr {
        Expression::GreaterThan {
            operand,
            expression,
        } => {
            let (aggregation, value) = compare(operand, expression)?;
            HavingSpec::GreaterThan { aggregation, value }
        }
        Expression::LessThan {
            operand,
            expression,
        } => {
            let (aggregation, value) = compare(operand, expression)?;
            HavingSpec::LessThan { aggregation, value }
        }
        Expression::Is {
            operand,
            expression,
        } => {
            let (aggregation, value) = compare(operand, expression)?;
            HavingSpec::EqualTo { aggregation, value }
        }
        Expression::GreaterThanOrEqual {
            operand,
            expression,
        } => {
            let (aggregation, value) = compare(operand, expression)?;
            HavingSpec::Not {
                having_spec: Box::new(HavingSpec::LessThan { aggregation, value }),
            }
        }
        Expression::LessThanOrEqual {
            operand,
            expression,
        } => {
            let (aggregation, value) = compare(operand, expression)?;
            HavingSpec::Not {
                having_spec: Box::new(HavingSpec::GreaterThan { aggregation, value }),
            }
        }
        Expression::And { operands } => HavingSpec::And {
            having_specs: operands.iter().map(having_spec).collect::<CompileResult<_>>()?,
        },
        Expression::Or { operands } => HavingSpec::Or {
            having_specs: operands.iter().map(having_spec).collect::<CompileResult<_>>()?,
        },
        Expression::Not { operand } => HavingSpec::Not {
            having_spec: Box::new(having_spec(operand)?),
        },
        other => return Err(CompileError::UnsupportedHaving(other.op_name().into())),
    })
}
