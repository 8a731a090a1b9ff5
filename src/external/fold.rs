//! Folding an expression chain into one query description.
//!
//! The input is either an aggregate over the dataset (value mode), `ply()`
//! with a run of `apply`s (totals), or `$dataset` with `filter`, `split`,
//! `apply`, `sort` and `limit` (split or raw). Folding walks the chain once,
//! type-checks every piece against the declared attributes and produces a
//! `FoldedQuery` whose aggregates all have the normalized operand form
//! `$data` or `$data.filter(f)`.
//!
//! Rewrites applied on the way:
//!
//! - `average(x)` becomes `sum(x) / count()`
//! - `sum(a + b)` becomes `sum(a) + sum(b)` when `a` and `b` are attributes
//! - a later apply with an existing name replaces the earlier one in place
//! - filters shared by every aggregate move into the query filter

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, trace};

use super::{CompileError, CompileResult, ExternalValue};
use crate::model::expr::{and_all, r, simplify_and};
use crate::model::{Expression, ExpressionError, PlyType, SortDirection};

/// Shape of the folded query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Rows of the dataset itself.
    Raw,
    /// A single aggregate value.
    Value,
    /// One row of totals.
    Total,
    /// One row per distinct split key.
    Split,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedExpression {
    pub name: String,
    pub expression: Expression,
    /// The apply was a single aggregate that folding turned into arithmetic.
    pub rewritten: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitSpec {
    /// Output name to key expression, ordered by name.
    pub keys: BTreeMap<String, Expression>,
    pub data_name: String,
}

impl SplitSpec {
    /// The only key of a single-key split.
    pub fn single_key(&self) -> Option<(&str, &Expression)> {
        if self.keys.len() == 1 {
            self.keys.iter().next().map(|(k, v)| (k.as_str(), v))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub name: String,
    pub direction: SortDirection,
}

/// A filter on split output rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Having {
    pub expression: Expression,
    /// The filter follows the limit, so it cannot be pushed to the engine.
    pub after_limit: bool,
}

/// A dataset-valued apply evaluated once per parent row.
///
/// The split chain's operand already carries the parent's filters; binding
/// to a parent row only adds the key predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedApply {
    pub name: String,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoldedQuery {
    pub mode: QueryMode,
    /// Name aggregate operands refer to.
    pub data_name: String,
    /// External base filter AND every query-level filter, simplified.
    pub filter: Expression,
    pub split: Option<SplitSpec>,
    pub applies: Vec<NamedExpression>,
    pub sort: Option<SortSpec>,
    pub limit: Option<u64>,
    pub having: Option<Having>,
    pub nested: Vec<NestedApply>,
    /// Result types of keys and applies.
    pub types: BTreeMap<String, PlyType>,
}

impl FoldedQuery {
    pub fn apply(&self, name: &str) -> Option<&NamedExpression> {
        self.applies.iter().find(|a| a.name == name)
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.split.as_ref().is_some_and(|s| s.keys.contains_key(name))
    }
}

/// Name of the single apply in value mode.
pub const VALUE_NAME: &str = "__VALUE__";

// ============================================================================
// Entry point
// ============================================================================

pub fn fold(external: &ExternalValue, expression: &Expression) -> CompileResult<FoldedQuery> {
    validate_regexes(expression)?;
    let mut scope = Scope::new(external, expression);

    if !is_dataset_op(expression) {
        if expression.contains_aggregate() {
            return fold_value(&mut scope, expression);
        }
        return Err(CompileError::unsupported(format!(
            "top level {} has nothing to query",
            expression.op_name()
        )));
    }

    let (base, ops) = unwind(expression);
    match base {
        Expression::Ply => fold_ply(&mut scope, &ops),
        Expression::Ref { name } => fold_dataset(&mut scope, name, &ops),
        other => Err(CompileError::unsupported(format!(
            "{} as the base of a query",
            other.op_name()
        ))),
    }
}

// ============================================================================
// Scope: name resolution for type inference
// ============================================================================

struct Scope<'a> {
    external: &'a ExternalValue,
    datasets: BTreeSet<String>,
    names: BTreeMap<String, PlyType>,
}

impl<'a> Scope<'a> {
    fn new(external: &'a ExternalValue, expression: &Expression) -> Self {
        let mut datasets = BTreeSet::new();
        collect_dataset_refs(expression, &mut datasets);
        Self {
            external,
            datasets,
            names: BTreeMap::new(),
        }
    }

    fn resolve(&self, name: &str) -> Option<PlyType> {
        self.names
            .get(name)
            .copied()
            .or_else(|| self.datasets.contains(name).then_some(PlyType::Dataset))
            .or_else(|| self.external.attribute_type(name))
    }

    fn infer(&self, e: &Expression) -> CompileResult<PlyType> {
        Ok(e.infer_type(&|n| self.resolve(n))?)
    }

    fn check_boolean(&self, e: &Expression) -> CompileResult<()> {
        match self.infer(e)? {
            PlyType::Boolean | PlyType::Null => Ok(()),
            actual => Err(ExpressionError::TypeMismatch {
                op: "filter",
                expected: PlyType::Boolean.to_string(),
                actual,
            }
            .into()),
        }
    }
}

// ============================================================================
// Modes
// ============================================================================

fn fold_value(scope: &mut Scope<'_>, expression: &Expression) -> CompileResult<FoldedQuery> {
    scope.infer(expression)?;
    let data_name = first_dataset(scope);
    let resolved = resolve_aggregates(expression, &|root| {
        Ok((root.to_string(), Vec::new()))
    })?;
    let common = common_filters(&[&resolved.0]);
    let value = collapse_aggregates(&resolved.0, &data_name, &common);
    debug!(data = %data_name, "folded value query");

    Ok(FoldedQuery {
        mode: QueryMode::Value,
        filter: query_filter(scope.external, common),
        data_name,
        split: None,
        applies: vec![NamedExpression {
            name: VALUE_NAME.into(),
            expression: value,
            rewritten: resolved.1,
        }],
        sort: None,
        limit: None,
        having: None,
        nested: Vec::new(),
        types: BTreeMap::from([(VALUE_NAME.to_string(), PlyType::Number)]),
    })
}

fn fold_ply(scope: &mut Scope<'_>, ops: &[&Expression]) -> CompileResult<FoldedQuery> {
    // alias name -> (external name, filters relative to the external)
    let mut aliases: HashMap<String, (String, Vec<Expression>)> = HashMap::new();
    let mut applies: Vec<NamedExpression> = Vec::new();
    let mut nested = Vec::new();
    let mut data_name: Option<String> = None;

    for op in ops {
        let Expression::Apply {
            name, expression, ..
        } = op
        else {
            return Err(CompileError::unsupported(format!(
                "{} on ply()",
                op.op_name()
            )));
        };

        if let Some((root, filters)) = expression.dataset_chain() {
            for f in &filters {
                scope.check_boolean(f)?;
            }
            let (external_name, mut resolved) = resolve_alias(&aliases, root);
            resolved.extend(filters.into_iter().cloned());
            data_name.get_or_insert_with(|| external_name.clone());
            trace!(alias = %name, filters = resolved.len(), "dataset alias");
            aliases.insert(name.clone(), (external_name, resolved));
            continue;
        }

        if chain_has_split(expression) {
            let (base, _) = unwind(expression);
            let root = base.as_ref_name().ok_or_else(|| {
                CompileError::unsupported(format!("nested '{}' is not over a dataset", name))
            })?;
            let (external_name, filters) = resolve_alias(&aliases, root);
            let expression = replace_chain_root(expression, dataset_expr(&external_name, filters));
            scope.names.insert(name.clone(), PlyType::Dataset);
            nested.push(NestedApply {
                name: name.clone(),
                expression,
            });
            continue;
        }

        let ty = scope.infer(expression)?;
        let (resolved, rewritten) = resolve_aggregates(expression, &|root| {
            Ok(resolve_alias(&aliases, root))
        })?;
        if data_name.is_none() {
            data_name = first_aggregate_root(&resolved);
        }
        scope.names.insert(name.clone(), ty);
        push_apply(
            &mut applies,
            NamedExpression {
                name: name.clone(),
                expression: resolved,
                rewritten,
            },
        );
    }

    let data_name = data_name.unwrap_or_else(|| first_dataset(scope));
    let exprs: Vec<&Expression> = applies.iter().map(|a| &a.expression).collect();
    let common = common_filters(&exprs);
    for apply in &mut applies {
        apply.expression = collapse_aggregates(&apply.expression, &data_name, &common);
    }
    debug!(
        applies = applies.len(),
        nested = nested.len(),
        "folded totals query"
    );

    Ok(FoldedQuery {
        mode: QueryMode::Total,
        filter: query_filter(scope.external, common),
        data_name,
        split: None,
        applies,
        sort: None,
        limit: None,
        having: None,
        nested,
        types: scope.names.clone(),
    })
}

fn fold_dataset(scope: &mut Scope<'_>, root: &str, ops: &[&Expression]) -> CompileResult<FoldedQuery> {
    let mut filters: Vec<Expression> = Vec::new();
    let mut split: Option<SplitSpec> = None;
    let mut applies: Vec<NamedExpression> = Vec::new();
    let mut nested = Vec::new();
    let mut sort: Option<SortSpec> = None;
    let mut limit: Option<u64> = None;
    let mut having: Option<Having> = None;

    for op in ops {
        match op {
            Expression::Filter { expression, .. } => {
                scope.check_boolean(expression)?;
                if split.is_some() {
                    let after_limit = limit.is_some();
                    having = Some(match having.take() {
                        None => Having {
                            expression: (**expression).clone(),
                            after_limit,
                        },
                        Some(h) => Having {
                            expression: h.expression.and((**expression).clone()),
                            after_limit: h.after_limit || after_limit,
                        },
                    });
                } else if sort.is_some() || limit.is_some() {
                    return Err(CompileError::unsupported("filter after sort or limit"));
                } else {
                    filters.push((**expression).clone());
                }
            }
            Expression::Split {
                keys, data_name, ..
            } => {
                if split.is_some() {
                    return Err(CompileError::unsupported("split of a split dataset"));
                }
                if sort.is_some() || limit.is_some() {
                    return Err(CompileError::unsupported("split after sort or limit"));
                }
                if keys.is_empty() {
                    return Err(CompileError::unsupported("split without keys"));
                }
                for (name, key) in keys {
                    if key.contains_aggregate() {
                        return Err(CompileError::unsupported(format!(
                            "aggregate in split key '{}'",
                            name
                        )));
                    }
                    let ty = scope.infer(key)?;
                    scope.names.insert(name.clone(), ty);
                }
                scope.datasets.insert(data_name.clone());
                split = Some(SplitSpec {
                    keys: keys.clone(),
                    data_name: data_name.clone(),
                });
            }
            Expression::Apply {
                name, expression, ..
            } => {
                let Some(spec) = &split else {
                    return Err(CompileError::unsupported(format!(
                        "apply '{}' on unsplit data",
                        name
                    )));
                };
                if chain_has_split(expression) {
                    let parent = dataset_expr(root, filters.clone());
                    nested.push(NestedApply {
                        name: name.clone(),
                        expression: replace_chain_root(expression, parent),
                    });
                    scope.names.insert(name.clone(), PlyType::Dataset);
                    continue;
                }
                let ty = scope.infer(expression)?;
                let data = spec.data_name.clone();
                let (resolved, rewritten) = resolve_aggregates(expression, &|r| {
                    if r == data {
                        Ok((data.clone(), Vec::new()))
                    } else {
                        Err(CompileError::unsupported(format!(
                            "aggregate over ${} inside a split of ${}",
                            r, data
                        )))
                    }
                })?;
                scope.names.insert(name.clone(), ty);
                push_apply(
                    &mut applies,
                    NamedExpression {
                        name: name.clone(),
                        expression: collapse_aggregates(&resolved, &data, &[]),
                        rewritten,
                    },
                );
            }
            Expression::Sort {
                expression,
                direction,
                ..
            } => {
                let name = expression
                    .as_ref_name()
                    .ok_or_else(|| CompileError::unsupported("sort on a derived expression"))?;
                if scope.resolve(name).is_none() {
                    return Err(ExpressionError::UnknownReference(name.into()).into());
                }
                if limit.is_some() {
                    return Err(CompileError::unsupported("sort after limit"));
                }
                sort = Some(SortSpec {
                    name: name.into(),
                    direction: *direction,
                });
            }
            Expression::Limit { value, .. } => {
                limit = Some(limit.map_or(*value, |l| l.min(*value)));
            }
            other => {
                return Err(CompileError::unsupported(format!(
                    "{} in a dataset chain",
                    other.op_name()
                )))
            }
        }
    }

    let mode = if split.is_some() {
        QueryMode::Split
    } else {
        QueryMode::Raw
    };
    let data_name = split
        .as_ref()
        .map(|s| s.data_name.clone())
        .unwrap_or_else(|| root.to_string());
    debug!(?mode, data = %data_name, applies = applies.len(), "folded dataset query");

    Ok(FoldedQuery {
        mode,
        filter: query_filter(scope.external, filters),
        data_name,
        split,
        applies,
        sort,
        limit,
        having,
        nested,
        types: scope.names.clone(),
    })
}

// ============================================================================
// Chain helpers
// ============================================================================

fn is_dataset_op(e: &Expression) -> bool {
    matches!(
        e,
        Expression::Ply
            | Expression::Filter { .. }
            | Expression::Split { .. }
            | Expression::Apply { .. }
            | Expression::Sort { .. }
            | Expression::Limit { .. }
    )
}

/// Base of a dataset chain and its operations, innermost first.
fn unwind(expr: &Expression) -> (&Expression, Vec<&Expression>) {
    let mut ops = Vec::new();
    let mut cur = expr;
    loop {
        match cur {
            Expression::Filter { operand, .. }
            | Expression::Split { operand, .. }
            | Expression::Apply { operand, .. }
            | Expression::Sort { operand, .. }
            | Expression::Limit { operand, .. } => {
                ops.push(cur);
                cur = operand;
            }
            _ => break,
        }
    }
    ops.reverse();
    (cur, ops)
}

pub(crate) fn chain_has_split(expr: &Expression) -> bool {
    unwind(expr)
        .1
        .iter()
        .any(|op| matches!(op, Expression::Split { .. }))
}

/// Replace the base of a dataset chain.
pub(crate) fn replace_chain_root(expr: &Expression, root: Expression) -> Expression {
    let mut out = expr.clone();
    replace_root_in_place(&mut out, root);
    out
}

fn replace_root_in_place(expr: &mut Expression, root: Expression) {
    match expr {
        Expression::Filter { operand, .. }
        | Expression::Split { operand, .. }
        | Expression::Apply { operand, .. }
        | Expression::Sort { operand, .. }
        | Expression::Limit { operand, .. } => replace_root_in_place(operand, root),
        other => *other = root,
    }
}

fn dataset_expr(name: &str, filters: Vec<Expression>) -> Expression {
    let filter = and_all(filters);
    if filter.is_literal_true() {
        r(name)
    } else {
        r(name).filter(filter)
    }
}

fn collect_dataset_refs(e: &Expression, out: &mut BTreeSet<String>) {
    let operand = match e {
        Expression::Filter { operand, .. }
        | Expression::Split { operand, .. }
        | Expression::Apply { operand, .. }
        | Expression::Sort { operand, .. }
        | Expression::Limit { operand, .. } => Some(operand.as_ref()),
        other => other.aggregate_operand(),
    };
    if let Some(name) = operand.and_then(|o| o.as_ref_name()) {
        out.insert(name.to_string());
    }
    if let Expression::Split { data_name, .. } = e {
        out.insert(data_name.clone());
    }
    for child in e.children() {
        collect_dataset_refs(child, out);
    }
}

fn first_dataset(scope: &Scope<'_>) -> String {
    scope
        .datasets
        .iter()
        .next()
        .cloned()
        .unwrap_or_else(|| "data".to_string())
}

fn resolve_alias(
    aliases: &HashMap<String, (String, Vec<Expression>)>,
    root: &str,
) -> (String, Vec<Expression>) {
    aliases
        .get(root)
        .cloned()
        .unwrap_or_else(|| (root.to_string(), Vec::new()))
}

fn push_apply(applies: &mut Vec<NamedExpression>, apply: NamedExpression) {
    match applies.iter_mut().find(|a| a.name == apply.name) {
        Some(slot) => *slot = apply,
        None => applies.push(apply),
    }
}

fn query_filter(external: &ExternalValue, filters: Vec<Expression>) -> Expression {
    let mut all = vec![external.filter().clone()];
    all.extend(filters);
    simplify_and(and_all(all))
}

// ============================================================================
// Aggregate normalization
// ============================================================================

type RootResolver<'r> = dyn Fn(&str) -> CompileResult<(String, Vec<Expression>)> + 'r;

/// Resolve every aggregate operand to `$root.filter(f1).filter(f2)...` with
/// one filter node per predicate, applying the aggregate rewrites.
///
/// Returns whether the top-level node was a rewritten aggregate.
fn resolve_aggregates(
    expr: &Expression,
    resolve: &RootResolver<'_>,
) -> CompileResult<(Expression, bool)> {
    let rewritten = expr.is_aggregate() && rewrite_aggregate(expr).is_some();
    let out = expr.transform::<CompileError>(&mut |e| {
        if !e.is_aggregate() {
            return Ok(None);
        }
        let operand = e.aggregate_operand().ok_or_else(|| {
            CompileError::unsupported(format!("{} without a dataset", e.op_name()))
        })?;
        let (root, local) = operand.dataset_chain().ok_or_else(|| {
            CompileError::unsupported(format!("{} over a non-dataset operand", e.op_name()))
        })?;
        let (resolved_root, mut filters) = resolve(root)?;
        filters.extend(local.into_iter().cloned());
        let chained = filters
            .into_iter()
            .fold(r(&resolved_root), |acc, f| acc.filter(f));
        let normalized = e.with_aggregate_operand(chained);
        Ok(Some(rewrite_aggregate(&normalized).unwrap_or(normalized)))
    })?;
    Ok((out, rewritten))
}

/// `average` and distributable `sum`s expressed through simpler aggregates.
fn rewrite_aggregate(agg: &Expression) -> Option<Expression> {
    match agg {
        Expression::Average {
            operand,
            expression,
        } => Some(
            (**operand).clone().sum((**expression).clone()) / (**operand).clone().count(),
        ),
        Expression::Sum {
            operand,
            expression,
        } => {
            let data = (**operand).clone();
            match expression.as_ref() {
                Expression::Add {
                    operand: a,
                    expression: b,
                } if is_plain_ref(a) && is_plain_ref(b) => {
                    Some(data.clone().sum((**a).clone()) + data.sum((**b).clone()))
                }
                Expression::Subtract {
                    operand: a,
                    expression: b,
                } if is_plain_ref(a) && is_plain_ref(b) => {
                    Some(data.clone().sum((**a).clone()) - data.sum((**b).clone()))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn is_plain_ref(e: &Expression) -> bool {
    e.as_ref_name().is_some()
}

fn collect_aggregates<'e>(e: &'e Expression, out: &mut Vec<&'e Expression>) {
    if e.is_aggregate() {
        out.push(e);
        return;
    }
    for child in e.children() {
        collect_aggregates(child, out);
    }
}

fn first_aggregate_root(e: &Expression) -> Option<String> {
    let mut aggs = Vec::new();
    collect_aggregates(e, &mut aggs);
    aggs.first()
        .and_then(|a| a.aggregate_operand())
        .and_then(|o| o.dataset_chain())
        .map(|(root, _)| root.to_string())
}

/// Filters every aggregate of `exprs` is restricted by, in first-seen order.
fn common_filters(exprs: &[&Expression]) -> Vec<Expression> {
    let mut aggs = Vec::new();
    for e in exprs {
        collect_aggregates(e, &mut aggs);
    }
    let lists: Vec<Vec<&Expression>> = aggs
        .iter()
        .filter_map(|a| a.aggregate_operand().and_then(|o| o.dataset_chain()))
        .map(|(_, filters)| filters)
        .collect();
    match lists.split_first() {
        None => Vec::new(),
        Some((first, rest)) => first
            .iter()
            .filter(|f| rest.iter().all(|l| l.contains(f)))
            .map(|f| (*f).clone())
            .collect(),
    }
}

/// Collapse aggregate operands to `$data` or `$data.filter(f)`, dropping `common`.
fn collapse_aggregates(expr: &Expression, data_name: &str, common: &[Expression]) -> Expression {
    let collapsed: Result<Expression, std::convert::Infallible> = expr.transform(&mut |e| {
        if !e.is_aggregate() {
            return Ok(None);
        }
        let local: Vec<Expression> = e
            .aggregate_operand()
            .and_then(|o| o.dataset_chain())
            .map(|(_, filters)| {
                filters
                    .into_iter()
                    .filter(|f| !common.contains(f))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(e.with_aggregate_operand(dataset_expr(data_name, local))))
    });
    match collapsed {
        Ok(e) => e,
        Err(never) => match never {},
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_regexes(expr: &Expression) -> CompileResult<()> {
    if let Expression::Match { regexp, .. } | Expression::Extract { regexp, .. } = expr {
        regex::Regex::new(regexp).map_err(|e| CompileError::InvalidRegex {
            pattern: regexp.clone(),
            message: e.to_string(),
        })?;
    }
    expr.children().into_iter().try_for_each(validate_regexes)
}
