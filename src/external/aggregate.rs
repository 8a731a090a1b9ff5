//! Splitting applies into engine aggregates and arithmetic over them.
//!
//! An apply that is a bare aggregate becomes a named aggregate. Every other
//! apply becomes a post-aggregate whose aggregates are pulled out into
//! synthetic `!T_<n>` entries and referenced by name. A synthetic aggregate
//! structurally equal to an existing one reuses that name.

use super::fold::NamedExpression;
use crate::model::{r, Expression};

/// Prefix of generated aggregate names; rows keep only names without it.
pub const SYNTHETIC_PREFIX: char = '!';

#[derive(Debug, Clone, PartialEq)]
pub struct NamedAggregate {
    pub name: String,
    pub expression: Expression,
    pub synthetic: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostAggregate {
    pub name: String,
    /// Arithmetic over `$aggregate_name` references and literals.
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregateSet {
    pub aggregates: Vec<NamedAggregate>,
    pub post_aggregates: Vec<PostAggregate>,
}

impl AggregateSet {
    pub fn collect(applies: &[NamedExpression]) -> AggregateSet {
        let mut set = AggregateSet::default();
        for apply in applies {
            if apply.expression.is_aggregate() {
                set.aggregates.push(NamedAggregate {
                    name: apply.name.clone(),
                    expression: apply.expression.clone(),
                    synthetic: false,
                });
            }
        }

        let derived = applies
            .iter()
            .filter(|a| !a.expression.is_aggregate() && a.rewritten)
            .chain(
                applies
                    .iter()
                    .filter(|a| !a.expression.is_aggregate() && !a.rewritten),
            );

        let mut synthetic = Vec::new();
        for apply in derived {
            let inlined = set.inline_post_references(&apply.expression);
            let expression = set.extract(&inlined, &mut synthetic);
            set.post_aggregates.push(PostAggregate {
                name: apply.name.clone(),
                expression,
            });
        }
        set.aggregates.extend(synthetic);
        set
    }

    pub fn aggregate(&self, name: &str) -> Option<&NamedAggregate> {
        self.aggregates.iter().find(|a| a.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty() && self.post_aggregates.is_empty()
    }

    /// Names a caller asked for: every non-synthetic aggregate and post-aggregate.
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.aggregates
            .iter()
            .filter(|a| !a.synthetic)
            .map(|a| a.name.as_str())
            .chain(self.post_aggregates.iter().map(|p| p.name.as_str()))
    }

    /// References to earlier derived applies are replaced by their arithmetic.
    fn inline_post_references(&self, expr: &Expression) -> Expression {
        self.post_aggregates
            .iter()
            .fold(expr.clone(), |acc, post| acc.substitute(&post.name, &post.expression))
    }

    fn extract(&self, expr: &Expression, synthetic: &mut Vec<NamedAggregate>) -> Expression {
        if expr.is_aggregate() {
            let existing = self
                .aggregates
                .iter()
                .chain(synthetic.iter())
                .find(|a| a.expression == *expr)
                .map(|a| a.name.clone());
            let name = existing.unwrap_or_else(|| {
                let name = format!("{}T_{}", SYNTHETIC_PREFIX, synthetic.len());
                synthetic.push(NamedAggregate {
                    name: name.clone(),
                    expression: expr.clone(),
                    synthetic: true,
                });
                name
            });
            return r(&name);
        }
        let rebuilt: Result<Expression, std::convert::Infallible> = expr.transform(&mut |e| {
            if e.is_aggregate() {
                Ok(Some(self.extract(e, synthetic)))
            } else {
                Ok(None)
            }
        });
        match rebuilt {
            Ok(e) => e,
            Err(never) => match never {},
        }
    }
}

/// Whether `name` was generated rather than requested.
pub fn is_synthetic(name: &str) -> bool {
    name.starts_with(SYNTHETIC_PREFIX)
}
