//! Lowering a folded query to one SQL SELECT.
//!
//! Every mode is a single statement against the External's source table:
//! raw rows select each attribute, totals and values select the inlined
//! aggregates, and splits group by output ordinals. Post aggregations are
//! inlined arithmetic over the aggregates they reference.

use std::collections::BTreeMap;

use tracing::debug;

use super::dialect::SqlDialect;
use super::query::{OrderByExpr, Query, SelectExpr, SortDir, TableRef};
use super::render::SqlRenderer;
use crate::external::time_filter::split_time_filter;
use crate::external::{
    CompileError, CompileResult, ExternalValue, FoldedQuery, NamedExpression, QueryMode, SortSpec,
};
use crate::model::{Expression, SortDirection};

/// How a client-side regroup folds the values of one aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaggregate {
    Sum,
    Min,
    Max,
}

/// A split key computed from a grouped raw column after the rows arrive.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientKey {
    pub name: String,
    pub lookup: BTreeMap<String, String>,
}

/// A SELECT plus the work left to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlPlan {
    pub sql: String,
    pub client_keys: Vec<ClientKey>,
    /// Per-apply regroup rule, only set alongside `client_keys`.
    pub reaggregate: BTreeMap<String, Reaggregate>,
    pub client_sort: Option<SortSpec>,
    pub client_limit: Option<u64>,
}

impl SqlPlan {
    fn new(sql: String) -> Self {
        Self {
            sql,
            client_keys: Vec::new(),
            reaggregate: BTreeMap::new(),
            client_sort: None,
            client_limit: None,
        }
    }
}

pub fn plan(external: &ExternalValue, folded: &FoldedQuery) -> CompileResult<SqlPlan> {
    let dialect = external.sql_dialect().ok_or_else(|| {
        CompileError::InvalidConfig(format!("{} has no SQL dialect", external.engine().as_str()))
    })?;
    let planner = Planner {
        external,
        folded,
        dialect,
        renderer: SqlRenderer::new(dialect, external),
    };
    let plan = match folded.mode {
        QueryMode::Raw => planner.raw()?,
        QueryMode::Value | QueryMode::Total => planner.totals()?,
        QueryMode::Split => planner.split()?,
    };
    debug!(
        dialect = dialect.name(),
        mode = ?folded.mode,
        client_keys = plan.client_keys.len(),
        "planned sql query"
    );
    Ok(plan)
}

struct Planner<'a> {
    external: &'a ExternalValue,
    folded: &'a FoldedQuery,
    dialect: &'a dyn SqlDialect,
    renderer: SqlRenderer<'a>,
}

impl<'a> Planner<'a> {
    /// FROM and WHERE. Time conjuncts are lifted into ranges the same way
    /// Druid intervals are, so both backends select the same instants.
    fn base(&self) -> CompileResult<Query> {
        let mut query = Query::new().from(TableRef::new(self.external.source()));
        let time_attribute = self.external.time_attribute();
        let time = split_time_filter(&self.folded.filter, time_attribute);
        if let (Some(attr), Some(ranges)) = (time_attribute, &time.intervals) {
            query = query.filter(&self.renderer.time_ranges(attr, ranges));
        }
        if !time.rest.is_literal_true() {
            query = query.filter(&self.renderer.render(&time.rest)?);
        }
        Ok(query)
    }

    fn raw(&self) -> CompileResult<SqlPlan> {
        let columns = self
            .external
            .attributes()
            .iter()
            .map(|a| SelectExpr::new(self.renderer.identifier(&a.name)));
        let mut query = self.base()?.select(columns);
        if let Some(sort) = &self.folded.sort {
            query = query.order_by([order(sort)]);
        }
        if let Some(limit) = self.folded.limit {
            query = query.limit(limit);
        }
        Ok(SqlPlan::new(query.to_sql(self.dialect)))
    }

    fn totals(&self) -> CompileResult<SqlPlan> {
        let applies = inline_applies(&self.folded.applies, &BTreeMap::new());
        let columns = applies
            .iter()
            .map(|(name, e)| Ok(SelectExpr::new(self.renderer.render(e)?).with_alias(name)))
            .collect::<CompileResult<Vec<_>>>()?;
        let query = self.base()?.select(columns);
        Ok(SqlPlan::new(query.to_sql(self.dialect)))
    }

    fn split(&self) -> CompileResult<SqlPlan> {
        let Some(split) = &self.folded.split else {
            return Err(CompileError::unsupported("split mode without keys"));
        };
        let mut client_keys = Vec::new();
        let mut columns = Vec::new();
        for (name, key) in &split.keys {
            let key = match self.client_lookup(key) {
                Some((column, lookup)) => {
                    client_keys.push(ClientKey {
                        name: name.clone(),
                        lookup: lookup.clone(),
                    });
                    column
                }
                None => key,
            };
            columns.push(SelectExpr::new(self.renderer.render(key)?).with_alias(name));
        }

        let applies = inline_applies(&self.folded.applies, &split.keys);
        for (name, e) in &applies {
            columns.push(SelectExpr::new(self.renderer.render(e)?).with_alias(name));
        }

        let mut query = self
            .base()?
            .select(columns)
            .group_by((1..=split.keys.len()).map(|i| i.to_string()));

        if !client_keys.is_empty() {
            return self.client_side(query, client_keys);
        }

        if let Some(having) = &self.folded.having {
            if having.after_limit {
                return Err(CompileError::UnsupportedHaving(
                    "filter after a limit".into(),
                ));
            }
            let mut condition = having.expression.clone();
            for (name, e) in applies.iter().map(|(n, e)| (n, e)).chain(split.keys.iter()) {
                condition = condition.substitute(name, e);
            }
            query = query.having(&self.renderer.render(&condition)?);
        }
        if let Some(sort) = &self.folded.sort {
            query = query.order_by([order(sort)]);
        }
        if let Some(limit) = self.folded.limit {
            query = query.limit(limit);
        }
        Ok(SqlPlan::new(query.to_sql(self.dialect)))
    }

    /// The raw column and table of a lookup key the client may derive.
    fn client_lookup<'k>(
        &self,
        key: &'k Expression,
    ) -> Option<(&'k Expression, &'a BTreeMap<String, String>)> {
        if !self.external.allow_client_side_splits() {
            return None;
        }
        match key {
            Expression::Lookup { operand, lookup_fn } if operand.as_ref_name().is_some() => {
                self.external.lookup(lookup_fn).map(|table| (operand.as_ref(), table))
            }
            _ => None,
        }
    }

    /// Group on raw columns; the client maps keys, regroups, sorts and limits.
    fn client_side(&self, query: Query, client_keys: Vec<ClientKey>) -> CompileResult<SqlPlan> {
        if self.folded.having.is_some() {
            return Err(CompileError::UnsupportedHaving(
                "filter on a client-side split".into(),
            ));
        }
        let mut reaggregate = BTreeMap::new();
        for apply in &self.folded.applies {
            let rule = match &apply.expression {
                Expression::Count { .. } | Expression::Sum { .. } => Reaggregate::Sum,
                Expression::Min { .. } => Reaggregate::Min,
                Expression::Max { .. } => Reaggregate::Max,
                other => {
                    return Err(CompileError::UnsupportedAggregate(format!(
                        "{} over a client-side split",
                        other.op_name()
                    )))
                }
            };
            reaggregate.insert(apply.name.clone(), rule);
        }
        Ok(SqlPlan {
            sql: query.to_sql(self.dialect),
            client_keys,
            reaggregate,
            client_sort: self.folded.sort.clone(),
            client_limit: self.folded.limit,
        })
    }
}

/// Apply expressions with references to earlier applies and keys inlined.
fn inline_applies(
    applies: &[NamedExpression],
    keys: &BTreeMap<String, Expression>,
) -> Vec<(String, Expression)> {
    let mut out: Vec<(String, Expression)> = Vec::with_capacity(applies.len());
    for apply in applies {
        let mut e = apply.expression.clone();
        for (name, earlier) in out.iter().map(|(n, e)| (n, e)).chain(keys.iter()) {
            e = e.substitute(name, earlier);
        }
        out.push((apply.name.clone(), e));
    }
    out
}

fn order(sort: &SortSpec) -> OrderByExpr {
    let dir = match sort.direction {
        SortDirection::Ascending => SortDir::Asc,
        SortDirection::Descending => SortDir::Desc,
    };
    OrderByExpr::alias(&sort.name, dir)
}
