//! The expression tree consumed by the compiler.
//!
//! Expressions are immutable values. They serialize as JSON objects tagged by
//! `op`, which is the interchange format with the upstream parser:
//!
//! ```json
//! {"op": "count", "operand": {"op": "ref", "name": "diamonds"}}
//! ```
//!
//! Queries are built fluently:
//!
//! ```ignore
//! use heron::model::expr::*;
//!
//! let q = r("diamonds")
//!     .split_on("Cut", r("cut"), "data")
//!     .apply("Count", r("data").count())
//!     .sort(r("Count"), SortDirection::Descending)
//!     .limit(2);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::time::{Duration, TimePart, Timezone};
use super::types::{NumberRange, PlyType, Set, TimeRange, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("{op} expected {expected} but got {actual}")]
    TypeMismatch {
        op: &'static str,
        expected: String,
        actual: PlyType,
    },

    #[error("Unknown reference: ${0}")]
    UnknownReference(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A node of the query algebra.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Expression {
    // === Leaves ===
    Literal {
        value: Value,
    },
    Ref {
        name: String,
    },
    /// A single empty datum; the root of totals queries.
    Ply,

    // === Dataset operations ===
    Filter {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Split {
        operand: Box<Expression>,
        keys: BTreeMap<String, Expression>,
        data_name: String,
    },
    Apply {
        operand: Box<Expression>,
        name: String,
        expression: Box<Expression>,
    },
    Sort {
        operand: Box<Expression>,
        expression: Box<Expression>,
        direction: SortDirection,
    },
    Limit {
        operand: Box<Expression>,
        value: u64,
    },

    // === Aggregates ===
    Count {
        operand: Box<Expression>,
    },
    Sum {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Min {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Max {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Average {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    CountDistinct {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    /// A backend-specific aggregator configured on the External by name.
    CustomAggregate {
        operand: Box<Expression>,
        custom: String,
    },

    // === Arithmetic ===
    Add {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Subtract {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Multiply {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Divide {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Power {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Absolute {
        operand: Box<Expression>,
    },

    // === Boolean ===
    And {
        operands: Vec<Expression>,
    },
    Or {
        operands: Vec<Expression>,
    },
    Not {
        operand: Box<Expression>,
    },

    // === Comparison ===
    Is {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    In {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Overlap {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    GreaterThan {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    GreaterThanOrEqual {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    LessThan {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    LessThanOrEqual {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Contains {
        operand: Box<Expression>,
        expression: Box<Expression>,
        #[serde(default)]
        ignore_case: bool,
    },
    Match {
        operand: Box<Expression>,
        regexp: String,
    },

    // === String ===
    Concat {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Substr {
        operand: Box<Expression>,
        position: i64,
        len: i64,
    },
    Extract {
        operand: Box<Expression>,
        regexp: String,
    },
    Lookup {
        operand: Box<Expression>,
        lookup_fn: String,
    },
    Fallback {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    IndexOf {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },

    // === Time ===
    TimeBucket {
        operand: Box<Expression>,
        duration: Duration,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<Timezone>,
    },
    TimeFloor {
        operand: Box<Expression>,
        duration: Duration,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<Timezone>,
    },
    TimePart {
        operand: Box<Expression>,
        part: TimePart,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<Timezone>,
    },
    TimeShift {
        operand: Box<Expression>,
        duration: Duration,
        step: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<Timezone>,
    },

    // === Other ===
    NumberBucket {
        operand: Box<Expression>,
        size: f64,
        #[serde(default)]
        offset: f64,
    },
    Cast {
        operand: Box<Expression>,
        output_type: PlyType,
    },
}

// ============================================================================
// Leaf constructors
// ============================================================================

/// `$name`
pub fn r(name: &str) -> Expression {
    Expression::Ref { name: name.into() }
}

pub fn ply() -> Expression {
    Expression::Ply
}

pub fn lit(value: Value) -> Expression {
    Expression::Literal { value }
}

pub fn lit_str(s: &str) -> Expression {
    lit(Value::String(s.into()))
}

pub fn lit_num(n: f64) -> Expression {
    lit(Value::Number(n))
}

pub fn lit_bool(b: bool) -> Expression {
    lit(Value::Boolean(b))
}

pub fn lit_null() -> Expression {
    lit(Value::Null)
}

pub fn lit_time(t: DateTime<Utc>) -> Expression {
    lit(Value::Time(t))
}

pub fn lit_time_range(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Expression {
    lit(Value::TimeRange(TimeRange { start, end }))
}

pub fn lit_number_range(start: Option<f64>, end: Option<f64>) -> Expression {
    lit(Value::NumberRange(NumberRange { start, end }))
}

pub fn lit_set_str<I, S>(items: I) -> Expression
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    lit(Value::Set(Set::strings(items)))
}

// ============================================================================
// Fluent builders
// ============================================================================

fn bx(e: Expression) -> Box<Expression> {
    Box::new(e)
}

impl Expression {
    pub fn filter(self, expression: Expression) -> Expression {
        Expression::Filter {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn split<I, S>(self, keys: I, data_name: &str) -> Expression
    where
        I: IntoIterator<Item = (S, Expression)>,
        S: Into<String>,
    {
        Expression::Split {
            operand: bx(self),
            keys: keys.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            data_name: data_name.into(),
        }
    }

    pub fn split_on(self, name: &str, key: Expression, data_name: &str) -> Expression {
        self.split([(name, key)], data_name)
    }

    pub fn apply(self, name: &str, expression: Expression) -> Expression {
        Expression::Apply {
            operand: bx(self),
            name: name.into(),
            expression: bx(expression),
        }
    }

    pub fn sort(self, expression: Expression, direction: SortDirection) -> Expression {
        Expression::Sort {
            operand: bx(self),
            expression: bx(expression),
            direction,
        }
    }

    pub fn limit(self, value: u64) -> Expression {
        Expression::Limit {
            operand: bx(self),
            value,
        }
    }

    pub fn count(self) -> Expression {
        Expression::Count { operand: bx(self) }
    }

    pub fn sum(self, expression: Expression) -> Expression {
        Expression::Sum {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn min(self, expression: Expression) -> Expression {
        Expression::Min {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn max(self, expression: Expression) -> Expression {
        Expression::Max {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn average(self, expression: Expression) -> Expression {
        Expression::Average {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn count_distinct(self, expression: Expression) -> Expression {
        Expression::CountDistinct {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn custom_aggregate(self, custom: &str) -> Expression {
        Expression::CustomAggregate {
            operand: bx(self),
            custom: custom.into(),
        }
    }

    pub fn power(self, expression: Expression) -> Expression {
        Expression::Power {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn absolute(self) -> Expression {
        Expression::Absolute { operand: bx(self) }
    }

    /// Conjunction; nested `and`s are flattened.
    pub fn and(self, expression: Expression) -> Expression {
        and_all(vec![self, expression])
    }

    pub fn or(self, expression: Expression) -> Expression {
        let mut operands = Vec::new();
        for e in [self, expression] {
            match e {
                Expression::Or { operands: inner } => operands.extend(inner),
                other => operands.push(other),
            }
        }
        Expression::Or { operands }
    }

    pub fn is(self, expression: Expression) -> Expression {
        Expression::Is {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn is_in(self, expression: Expression) -> Expression {
        Expression::In {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn overlap(self, expression: Expression) -> Expression {
        Expression::Overlap {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn greater_than(self, expression: Expression) -> Expression {
        Expression::GreaterThan {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn greater_than_or_equal(self, expression: Expression) -> Expression {
        Expression::GreaterThanOrEqual {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn less_than(self, expression: Expression) -> Expression {
        Expression::LessThan {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn less_than_or_equal(self, expression: Expression) -> Expression {
        Expression::LessThanOrEqual {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn contains(self, expression: Expression) -> Expression {
        Expression::Contains {
            operand: bx(self),
            expression: bx(expression),
            ignore_case: false,
        }
    }

    pub fn contains_ignore_case(self, expression: Expression) -> Expression {
        Expression::Contains {
            operand: bx(self),
            expression: bx(expression),
            ignore_case: true,
        }
    }

    pub fn matches(self, regexp: &str) -> Expression {
        Expression::Match {
            operand: bx(self),
            regexp: regexp.into(),
        }
    }

    pub fn concat(self, expression: Expression) -> Expression {
        Expression::Concat {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn substr(self, position: i64, len: i64) -> Expression {
        Expression::Substr {
            operand: bx(self),
            position,
            len,
        }
    }

    pub fn extract(self, regexp: &str) -> Expression {
        Expression::Extract {
            operand: bx(self),
            regexp: regexp.into(),
        }
    }

    pub fn lookup(self, lookup_fn: &str) -> Expression {
        Expression::Lookup {
            operand: bx(self),
            lookup_fn: lookup_fn.into(),
        }
    }

    pub fn fallback(self, expression: Expression) -> Expression {
        Expression::Fallback {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn index_of(self, expression: Expression) -> Expression {
        Expression::IndexOf {
            operand: bx(self),
            expression: bx(expression),
        }
    }

    pub fn time_bucket(self, duration: Duration, timezone: Option<Timezone>) -> Expression {
        Expression::TimeBucket {
            operand: bx(self),
            duration,
            timezone,
        }
    }

    pub fn time_floor(self, duration: Duration, timezone: Option<Timezone>) -> Expression {
        Expression::TimeFloor {
            operand: bx(self),
            duration,
            timezone,
        }
    }

    pub fn time_part(self, part: TimePart, timezone: Option<Timezone>) -> Expression {
        Expression::TimePart {
            operand: bx(self),
            part,
            timezone,
        }
    }

    pub fn time_shift(self, duration: Duration, step: i32, timezone: Option<Timezone>) -> Expression {
        Expression::TimeShift {
            operand: bx(self),
            duration,
            step,
            timezone,
        }
    }

    pub fn number_bucket(self, size: f64, offset: f64) -> Expression {
        Expression::NumberBucket {
            operand: bx(self),
            size,
            offset,
        }
    }

    pub fn cast(self, output_type: PlyType) -> Expression {
        Expression::Cast {
            operand: bx(self),
            output_type,
        }
    }
}

macro_rules! arithmetic_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl std::ops::$trait for Expression {
            type Output = Expression;

            fn $method(self, rhs: Expression) -> Expression {
                Expression::$variant {
                    operand: bx(self),
                    expression: bx(rhs),
                }
            }
        }
    };
}

arithmetic_op!(Add, add, Add);
arithmetic_op!(Sub, sub, Subtract);
arithmetic_op!(Mul, mul, Multiply);
arithmetic_op!(Div, div, Divide);

impl std::ops::Not for Expression {
    type Output = Expression;

    fn not(self) -> Expression {
        Expression::Not { operand: bx(self) }
    }
}

// ============================================================================
// Structure
// ============================================================================

impl Expression {
    pub fn op_name(&self) -> &'static str {
        match self {
            Expression::Literal { .. } => "literal",
            Expression::Ref { .. } => "ref",
            Expression::Ply => "ply",
            Expression::Filter { .. } => "filter",
            Expression::Split { .. } => "split",
            Expression::Apply { .. } => "apply",
            Expression::Sort { .. } => "sort",
            Expression::Limit { .. } => "limit",
            Expression::Count { .. } => "count",
            Expression::Sum { .. } => "sum",
            Expression::Min { .. } => "min",
            Expression::Max { .. } => "max",
            Expression::Average { .. } => "average",
            Expression::CountDistinct { .. } => "countDistinct",
            Expression::CustomAggregate { .. } => "customAggregate",
            Expression::Add { .. } => "add",
            Expression::Subtract { .. } => "subtract",
            Expression::Multiply { .. } => "multiply",
            Expression::Divide { .. } => "divide",
            Expression::Power { .. } => "power",
            Expression::Absolute { .. } => "absolute",
            Expression::And { .. } => "and",
            Expression::Or { .. } => "or",
            Expression::Not { .. } => "not",
            Expression::Is { .. } => "is",
            Expression::In { .. } => "in",
            Expression::Overlap { .. } => "overlap",
            Expression::GreaterThan { .. } => "greaterThan",
            Expression::GreaterThanOrEqual { .. } => "greaterThanOrEqual",
            Expression::LessThan { .. } => "lessThan",
            Expression::LessThanOrEqual { .. } => "lessThanOrEqual",
            Expression::Contains { .. } => "contains",
            Expression::Match { .. } => "match",
            Expression::Concat { .. } => "concat",
            Expression::Substr { .. } => "substr",
            Expression::Extract { .. } => "extract",
            Expression::Lookup { .. } => "lookup",
            Expression::Fallback { .. } => "fallback",
            Expression::IndexOf { .. } => "indexOf",
            Expression::TimeBucket { .. } => "timeBucket",
            Expression::TimeFloor { .. } => "timeFloor",
            Expression::TimePart { .. } => "timePart",
            Expression::TimeShift { .. } => "timeShift",
            Expression::NumberBucket { .. } => "numberBucket",
            Expression::Cast { .. } => "cast",
        }
    }

    /// Direct sub-expressions, operand first.
    pub fn children(&self) -> Vec<&Expression> {
        use Expression::*;
        match self {
            Literal { .. } | Ref { .. } | Ply => vec![],
            Split { operand, keys, .. } => {
                let mut v: Vec<&Expression> = vec![operand];
                v.extend(keys.values());
                v
            }
            Filter { operand, expression }
            | Apply {
                operand,
                expression,
                ..
            }
            | Sort {
                operand,
                expression,
                ..
            }
            | Sum {
                operand,
                expression,
            }
            | Min {
                operand,
                expression,
            }
            | Max {
                operand,
                expression,
            }
            | Average {
                operand,
                expression,
            }
            | CountDistinct {
                operand,
                expression,
            }
            | Add {
                operand,
                expression,
            }
            | Subtract {
                operand,
                expression,
            }
            | Multiply {
                operand,
                expression,
            }
            | Divide {
                operand,
                expression,
            }
            | Power {
                operand,
                expression,
            }
            | Is {
                operand,
                expression,
            }
            | In {
                operand,
                expression,
            }
            | Overlap {
                operand,
                expression,
            }
            | GreaterThan {
                operand,
                expression,
            }
            | GreaterThanOrEqual {
                operand,
                expression,
            }
            | LessThan {
                operand,
                expression,
            }
            | LessThanOrEqual {
                operand,
                expression,
            }
            | Contains {
                operand,
                expression,
                ..
            }
            | Concat {
                operand,
                expression,
            }
            | Fallback {
                operand,
                expression,
            }
            | IndexOf {
                operand,
                expression,
            } => vec![operand, expression],
            And { operands } | Or { operands } => operands.iter().collect(),
            Limit { operand, .. }
            | Count { operand }
            | CustomAggregate { operand, .. }
            | Absolute { operand }
            | Not { operand }
            | Match { operand, .. }
            | Substr { operand, .. }
            | Extract { operand, .. }
            | Lookup { operand, .. }
            | TimeBucket { operand, .. }
            | TimeFloor { operand, .. }
            | TimePart { operand, .. }
            | TimeShift { operand, .. }
            | NumberBucket { operand, .. }
            | Cast { operand, .. } => vec![operand],
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expression> {
        use Expression::*;
        match self {
            Literal { .. } | Ref { .. } | Ply => vec![],
            Split { operand, keys, .. } => {
                let mut v: Vec<&mut Expression> = vec![operand.as_mut()];
                v.extend(keys.values_mut());
                v
            }
            Filter { operand, expression }
            | Apply {
                operand,
                expression,
                ..
            }
            | Sort {
                operand,
                expression,
                ..
            }
            | Sum {
                operand,
                expression,
            }
            | Min {
                operand,
                expression,
            }
            | Max {
                operand,
                expression,
            }
            | Average {
                operand,
                expression,
            }
            | CountDistinct {
                operand,
                expression,
            }
            | Add {
                operand,
                expression,
            }
            | Subtract {
                operand,
                expression,
            }
            | Multiply {
                operand,
                expression,
            }
            | Divide {
                operand,
                expression,
            }
            | Power {
                operand,
                expression,
            }
            | Is {
                operand,
                expression,
            }
            | In {
                operand,
                expression,
            }
            | Overlap {
                operand,
                expression,
            }
            | GreaterThan {
                operand,
                expression,
            }
            | GreaterThanOrEqual {
                operand,
                expression,
            }
            | LessThan {
                operand,
                expression,
            }
            | LessThanOrEqual {
                operand,
                expression,
            }
            | Contains {
                operand,
                expression,
                ..
            }
            | Concat {
                operand,
                expression,
            }
            | Fallback {
                operand,
                expression,
            }
            | IndexOf {
                operand,
                expression,
            } => vec![operand.as_mut(), expression.as_mut()],
            And { operands } | Or { operands } => operands.iter_mut().collect(),
            Limit { operand, .. }
            | Count { operand }
            | CustomAggregate { operand, .. }
            | Absolute { operand }
            | Not { operand }
            | Match { operand, .. }
            | Substr { operand, .. }
            | Extract { operand, .. }
            | Lookup { operand, .. }
            | TimeBucket { operand, .. }
            | TimeFloor { operand, .. }
            | TimePart { operand, .. }
            | TimeShift { operand, .. }
            | NumberBucket { operand, .. }
            | Cast { operand, .. } => vec![operand.as_mut()],
        }
    }

    /// Rebuild the tree top-down. Where `f` returns a replacement the subtree
    /// is swapped and not descended into.
    pub fn transform<E>(
        &self,
        f: &mut dyn FnMut(&Expression) -> Result<Option<Expression>, E>,
    ) -> Result<Expression, E> {
        if let Some(replaced) = f(self)? {
            return Ok(replaced);
        }
        let mut out = self.clone();
        for child in out.children_mut() {
            let rebuilt = child.transform(f)?;
            *child = rebuilt;
        }
        Ok(out)
    }

    /// Replace every `$from` with `to`.
    pub fn substitute(&self, from: &str, to: &Expression) -> Expression {
        let replaced: Result<Expression, std::convert::Infallible> = self.transform(&mut |e| {
            Ok(match e {
                Expression::Ref { name } if name == from => Some(to.clone()),
                _ => None,
            })
        });
        match replaced {
            Ok(e) => e,
            Err(never) => match never {},
        }
    }

    /// Every `$name` reachable from this node.
    pub fn references(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut BTreeSet<String>) {
        if let Expression::Ref { name } = self {
            out.insert(name.clone());
        }
        for child in self.children() {
            child.collect_references(out);
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Expression::Count { .. }
                | Expression::Sum { .. }
                | Expression::Min { .. }
                | Expression::Max { .. }
                | Expression::Average { .. }
                | Expression::CountDistinct { .. }
                | Expression::CustomAggregate { .. }
        )
    }

    /// Whether an aggregate appears anywhere in this tree.
    pub fn contains_aggregate(&self) -> bool {
        self.is_aggregate() || self.children().into_iter().any(|c| c.contains_aggregate())
    }

    pub fn as_ref_name(&self) -> Option<&str> {
        match self {
            Expression::Ref { name } => Some(name),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Expression::Literal { value } => Some(value),
            _ => None,
        }
    }

    pub fn is_literal_true(&self) -> bool {
        matches!(self, Expression::Literal { value: Value::Boolean(true) })
    }

    pub fn is_literal_false(&self) -> bool {
        matches!(self, Expression::Literal { value: Value::Boolean(false) })
    }

    /// The dataset operand of an aggregate (`$data.filter(..)` in `$data.filter(..).count()`).
    pub fn aggregate_operand(&self) -> Option<&Expression> {
        match self {
            Expression::Count { operand }
            | Expression::Sum { operand, .. }
            | Expression::Min { operand, .. }
            | Expression::Max { operand, .. }
            | Expression::Average { operand, .. }
            | Expression::CountDistinct { operand, .. }
            | Expression::CustomAggregate { operand, .. } => Some(operand),
            _ => None,
        }
    }

    /// Unwind a `$name.filter(a).filter(b)` chain into its root name and filters.
    pub fn dataset_chain(&self) -> Option<(&str, Vec<&Expression>)> {
        match self {
            Expression::Ref { name } => Some((name.as_str(), Vec::new())),
            Expression::Filter {
                operand,
                expression,
            } => {
                let (root, mut filters) = operand.dataset_chain()?;
                filters.push(expression);
                Some((root, filters))
            }
            _ => None,
        }
    }

    /// Rebuild an aggregate over a different dataset operand.
    pub fn with_aggregate_operand(&self, new_operand: Expression) -> Expression {
        let mut out = self.clone();
        match &mut out {
            Expression::Count { operand }
            | Expression::Sum { operand, .. }
            | Expression::Min { operand, .. }
            | Expression::Max { operand, .. }
            | Expression::Average { operand, .. }
            | Expression::CountDistinct { operand, .. }
            | Expression::CustomAggregate { operand, .. } => **operand = new_operand,
            _ => {}
        }
        out
    }
}

// ============================================================================
// Boolean simplification
// ============================================================================

/// Conjunction of `exprs`, flattening nested `and`s and folding literals.
pub fn and_all(exprs: Vec<Expression>) -> Expression {
    let mut operands = Vec::new();
    for e in exprs {
        if !push_conjunct(e, &mut operands) {
            return lit_bool(false);
        }
    }
    match operands.len() {
        0 => lit_bool(true),
        1 => operands.remove(0),
        _ => Expression::And { operands },
    }
}

/// Returns false when a literal `false` makes the conjunction unsatisfiable.
fn push_conjunct(e: Expression, out: &mut Vec<Expression>) -> bool {
    match e {
        Expression::And { operands } => operands.into_iter().all(|o| push_conjunct(o, out)),
        e if e.is_literal_true() => true,
        e if e.is_literal_false() => false,
        other => {
            out.push(other);
            true
        }
    }
}

/// Flatten, drop duplicates and narrow `x in S and x is v` to `x is v`.
///
/// The narrowed clause takes the position of the set membership clause.
pub fn simplify_and(expr: Expression) -> Expression {
    let operands = match and_all(vec![expr]) {
        Expression::And { operands } => operands,
        other => return other,
    };

    let mut out: Vec<Expression> = Vec::with_capacity(operands.len());
    for clause in operands {
        if out.contains(&clause) {
            continue;
        }
        if let Expression::Is {
            operand,
            expression,
        } = &clause
        {
            if expression.as_literal().is_some() {
                if let Some(slot) = out.iter_mut().find(|c| is_membership_of(c, operand)) {
                    *slot = clause;
                    continue;
                }
            }
        }
        if let Expression::In { operand, .. } = &clause {
            if out.iter().any(|c| is_equality_of(c, operand)) {
                continue;
            }
        }
        out.push(clause);
    }
    and_all(out)
}

fn is_membership_of(clause: &Expression, target: &Expression) -> bool {
    matches!(clause, Expression::In { operand, expression }
        if **operand == *target && matches!(expression.as_literal(), Some(Value::Set(_))))
}

fn is_equality_of(clause: &Expression, target: &Expression) -> bool {
    matches!(clause, Expression::Is { operand, expression }
        if **operand == *target && expression.as_literal().is_some())
}

// ============================================================================
// Type inference
// ============================================================================

impl Expression {
    /// Infer the result type, resolving `$name` through `resolve`.
    pub fn infer_type(
        &self,
        resolve: &dyn Fn(&str) -> Option<PlyType>,
    ) -> Result<PlyType, ExpressionError> {
        use Expression::*;
        let ty = |e: &Expression| e.infer_type(resolve);
        let expect = |op: &'static str, e: &Expression, wanted: &[PlyType]| {
            let actual = e.infer_type(resolve)?;
            if actual == PlyType::Null || wanted.contains(&actual) {
                Ok(actual)
            } else {
                Err(ExpressionError::TypeMismatch {
                    op,
                    expected: wanted
                        .iter()
                        .map(|t| t.as_str())
                        .collect::<Vec<_>>()
                        .join(" or "),
                    actual,
                })
            }
        };
        let op = self.op_name();

        match self {
            Literal { value } => Ok(value.ply_type()),
            Ref { name } => resolve(name).ok_or_else(|| ExpressionError::UnknownReference(name.clone())),
            Ply => Ok(PlyType::Dataset),

            Filter {
                operand,
                expression,
            } => {
                expect(op, operand, &[PlyType::Dataset])?;
                expect(op, expression, &[PlyType::Boolean])?;
                Ok(PlyType::Dataset)
            }
            Split { operand, .. } | Limit { operand, .. } => {
                expect(op, operand, &[PlyType::Dataset])?;
                Ok(PlyType::Dataset)
            }
            Apply { operand, .. } | Sort { operand, .. } => {
                expect(op, operand, &[PlyType::Dataset])?;
                Ok(PlyType::Dataset)
            }

            Count { operand } | CustomAggregate { operand, .. } => {
                expect(op, operand, &[PlyType::Dataset])?;
                Ok(PlyType::Number)
            }
            Sum {
                operand,
                expression,
            }
            | Average {
                operand,
                expression,
            } => {
                expect(op, operand, &[PlyType::Dataset])?;
                expect(op, expression, &[PlyType::Number])?;
                Ok(PlyType::Number)
            }
            Min {
                operand,
                expression,
            }
            | Max {
                operand,
                expression,
            } => {
                expect(op, operand, &[PlyType::Dataset])?;
                expect(op, expression, &[PlyType::Number, PlyType::Time])
            }
            CountDistinct { operand, .. } => {
                expect(op, operand, &[PlyType::Dataset])?;
                Ok(PlyType::Number)
            }

            Add {
                operand,
                expression,
            }
            | Subtract {
                operand,
                expression,
            }
            | Multiply {
                operand,
                expression,
            }
            | Divide {
                operand,
                expression,
            }
            | Power {
                operand,
                expression,
            } => {
                expect(op, operand, &[PlyType::Number])?;
                expect(op, expression, &[PlyType::Number])?;
                Ok(PlyType::Number)
            }
            Absolute { operand } => expect(op, operand, &[PlyType::Number]).map(|_| PlyType::Number),

            And { operands } | Or { operands } => {
                for o in operands {
                    expect(op, o, &[PlyType::Boolean])?;
                }
                Ok(PlyType::Boolean)
            }
            Not { operand } => expect(op, operand, &[PlyType::Boolean]),

            Is {
                operand,
                expression,
            } => {
                let left = ty(operand)?;
                let right = ty(expression)?;
                let compatible = left == right
                    || left == PlyType::Null
                    || right == PlyType::Null
                    || (left == PlyType::SetString && right == PlyType::String);
                if compatible {
                    Ok(PlyType::Boolean)
                } else {
                    Err(ExpressionError::TypeMismatch {
                        op,
                        expected: left.to_string(),
                        actual: right,
                    })
                }
            }
            In { operand, .. } | Overlap { operand, .. } => {
                ty(operand)?;
                Ok(PlyType::Boolean)
            }
            GreaterThan {
                operand,
                expression,
            }
            | GreaterThanOrEqual {
                operand,
                expression,
            }
            | LessThan {
                operand,
                expression,
            }
            | LessThanOrEqual {
                operand,
                expression,
            } => {
                let comparable = [PlyType::Number, PlyType::Time, PlyType::String];
                let left = expect(op, operand, &comparable)?;
                expect(op, expression, &[left])?;
                Ok(PlyType::Boolean)
            }
            Contains {
                operand,
                expression,
                ..
            } => {
                expect(op, operand, &[PlyType::String, PlyType::SetString])?;
                expect(op, expression, &[PlyType::String])?;
                Ok(PlyType::Boolean)
            }
            Match { operand, .. } => {
                expect(op, operand, &[PlyType::String])?;
                Ok(PlyType::Boolean)
            }

            Concat {
                operand,
                expression,
            } => {
                expect(op, operand, &[PlyType::String])?;
                expect(op, expression, &[PlyType::String])?;
                Ok(PlyType::String)
            }
            Substr { operand, .. } | Extract { operand, .. } | Lookup { operand, .. } => {
                expect(op, operand, &[PlyType::String])?;
                Ok(PlyType::String)
            }
            Fallback {
                operand,
                expression,
            } => {
                let left = ty(operand)?;
                expect(op, expression, &[left])?;
                Ok(left)
            }
            IndexOf {
                operand,
                expression,
            } => {
                expect(op, operand, &[PlyType::String])?;
                expect(op, expression, &[PlyType::String])?;
                Ok(PlyType::Number)
            }

            TimeBucket { operand, .. } | TimeFloor { operand, .. } | TimeShift { operand, .. } => {
                expect(op, operand, &[PlyType::Time])?;
                Ok(PlyType::Time)
            }
            TimePart { operand, .. } => {
                expect(op, operand, &[PlyType::Time])?;
                Ok(PlyType::Number)
            }
            NumberBucket { operand, .. } => {
                expect(op, operand, &[PlyType::Number])?;
                Ok(PlyType::Number)
            }
            Cast {
                operand,
                output_type,
            } => {
                ty(operand)?;
                Ok(*output_type)
            }
        }
    }
}
