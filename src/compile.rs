//! End-to-end compilation from an expression to native queries.
//!
//! ```text
//! Expression → fold → FoldedQuery → druid::plan | sql::plan → NativeQuery
//!                                                          + PostProcess
//! ```
//!
//! A query with nested splits is a chain: every nested level is a template
//! bound to one row of its parent, so only the root level can be planned
//! ahead of time. [`compile_plan`] returns that root plus the templates;
//! [`compile`] walks the whole chain against simulated parent rows and
//! returns every descriptor it would issue.
//!
//! # Example
//!
//! ```ignore
//! use heron::compile::compile;
//! use heron::model::{r, SortDirection};
//!
//! let expr = r("diamonds")
//!     .split_on("Cut", r("cut"), "data")
//!     .apply("Count", r("data").count())
//!     .sort(r("Count"), SortDirection::Descending)
//!     .limit(2);
//! let queries = compile(&external, &expr)?;
//! println!("{}", queries[0]);
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::druid::{self, DruidQuery};
use crate::external::aggregate::is_synthetic;
use crate::external::binding::{bind, simulated_row};
use crate::external::{fold, CompileResult, Engine, ExternalValue, QueryMode, Row, SortSpec};
use crate::model::types::number_to_json;
use crate::model::{Expression, PlyType, SortDirection};
use crate::sql::{self, ClientKey, Reaggregate};

// ============================================================================
// Native queries
// ============================================================================

/// One query in the language of the target engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NativeQuery {
    Druid(DruidQuery),
    Sql(String),
}

impl NativeQuery {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            NativeQuery::Druid(q) => q.to_json(),
            NativeQuery::Sql(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn as_druid(&self) -> Option<&DruidQuery> {
        match self {
            NativeQuery::Druid(q) => Some(q),
            NativeQuery::Sql(_) => None,
        }
    }

    pub fn as_sql(&self) -> Option<&str> {
        match self {
            NativeQuery::Sql(s) => Some(s),
            NativeQuery::Druid(_) => None,
        }
    }
}

impl fmt::Display for NativeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeQuery::Sql(s) => f.write_str(s),
            NativeQuery::Druid(q) => {
                let text = serde_json::to_string_pretty(q).map_err(|_| fmt::Error)?;
                f.write_str(&text)
            }
        }
    }
}

// ============================================================================
// Post-processing
// ============================================================================

/// How result rows are wrapped by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Envelope {
    /// Each row is already an output row.
    #[default]
    Rows,
    /// `{timestamp, result: {..}}`
    Timeseries,
    /// `{timestamp, result: [{..}, ..]}`
    TopN,
    /// `{timestamp, event: {..}}`
    GroupBy,
    /// `{result: {events: [{event: {..}}, ..]}}`
    Select,
    /// `{timestamp, result: {minTime, maxTime}}`
    TimeBoundary,
}

impl Envelope {
    fn of(query: &DruidQuery) -> Self {
        match query {
            DruidQuery::Timeseries(_) => Envelope::Timeseries,
            DruidQuery::TopN(_) => Envelope::TopN,
            DruidQuery::GroupBy(_) => Envelope::GroupBy,
            DruidQuery::Select(_) => Envelope::Select,
            DruidQuery::TimeBoundary(_) => Envelope::TimeBoundary,
        }
    }
}

/// Work done on the client after the engine answers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PostProcess {
    pub envelope: Envelope,
    /// Output name the engine's `timestamp` is reported under.
    pub timestamp_key: Option<String>,
    pub renames: BTreeMap<String, String>,
    /// Output types used to turn stringly engine values back into JSON scalars.
    pub types: BTreeMap<String, PlyType>,
    pub split_keys: Vec<String>,
    pub client_keys: Vec<ClientKey>,
    pub reaggregate: BTreeMap<String, Reaggregate>,
    pub sort: Option<SortSpec>,
    pub limit: Option<u64>,
}

impl PostProcess {
    /// Turn engine rows into output rows.
    pub fn apply(&self, raw: Vec<Row>) -> Vec<Row> {
        let mut rows: Vec<Row> = self
            .flatten(raw)
            .into_iter()
            .map(|row| self.clean(row))
            .collect();
        if !self.client_keys.is_empty() {
            rows = self.regroup(rows);
        }
        if let Some(sort) = &self.sort {
            rows.sort_by(|a, b| {
                let ord = compare_json(a.get(&sort.name), b.get(&sort.name));
                match sort.direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = self.limit {
            rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        rows
    }

    fn flatten(&self, raw: Vec<Row>) -> Vec<Row> {
        let mut out = Vec::with_capacity(raw.len());
        for mut item in raw {
            let timestamp = match self.envelope {
                Envelope::Rows => None,
                _ => item.remove("timestamp"),
            };
            let stamped = |mut row: Row| {
                if let (Some(key), Some(ts)) = (&self.timestamp_key, &timestamp) {
                    row.insert(key.clone(), ts.clone());
                }
                row
            };
            match self.envelope {
                Envelope::Rows => out.push(item),
                Envelope::Timeseries | Envelope::TimeBoundary => {
                    if let Some(serde_json::Value::Object(result)) = item.remove("result") {
                        out.push(stamped(result));
                    }
                }
                Envelope::GroupBy => {
                    if let Some(serde_json::Value::Object(event)) = item.remove("event") {
                        out.push(stamped(event));
                    }
                }
                Envelope::TopN => {
                    if let Some(serde_json::Value::Array(result)) = item.remove("result") {
                        out.extend(result.into_iter().filter_map(object));
                    }
                }
                Envelope::Select => {
                    let events = match item.remove("result") {
                        Some(serde_json::Value::Object(mut result)) => result.remove("events"),
                        _ => None,
                    };
                    if let Some(serde_json::Value::Array(events)) = events {
                        for event in events.into_iter().filter_map(object) {
                            let Some(mut row) = event.get("event").cloned().and_then(object) else {
                                continue;
                            };
                            if let Some(ts) = row.remove("timestamp") {
                                if let Some(key) = &self.timestamp_key {
                                    row.insert(key.clone(), ts);
                                }
                            }
                            out.push(row);
                        }
                    }
                }
            }
        }
        out
    }

    fn clean(&self, mut row: Row) -> Row {
        for (from, to) in &self.renames {
            if let Some(v) = row.remove(from) {
                row.insert(to.clone(), v);
            }
        }
        row.retain(|name, _| !is_synthetic(name));
        for (name, value) in row.iter_mut() {
            if let Some(ty) = self.types.get(name) {
                convert(value, *ty);
            }
        }
        row
    }

    /// Map client-side keys through their lookups and fold rows that now collide.
    fn regroup(&self, rows: Vec<Row>) -> Vec<Row> {
        let mut groups: Vec<(Vec<serde_json::Value>, Row)> = Vec::new();
        for mut row in rows {
            for key in &self.client_keys {
                let mapped = match row.get(&key.name) {
                    Some(serde_json::Value::String(s)) => key
                        .lookup
                        .get(s)
                        .map(|v| serde_json::Value::String(v.clone()))
                        .unwrap_or(serde_json::Value::Null),
                    _ => serde_json::Value::Null,
                };
                row.insert(key.name.clone(), mapped);
            }
            let tuple: Vec<serde_json::Value> = self
                .split_keys
                .iter()
                .map(|k| row.get(k).cloned().unwrap_or(serde_json::Value::Null))
                .collect();
            match groups.iter_mut().find(|(t, _)| *t == tuple) {
                Some((_, acc)) => self.fold_into(acc, &row),
                None => groups.push((tuple, row)),
            }
        }
        trace!(groups = groups.len(), "regrouped client-side split");
        groups.into_iter().map(|(_, row)| row).collect()
    }

    fn fold_into(&self, acc: &mut Row, row: &Row) {
        for (name, rule) in &self.reaggregate {
            let a = acc.get(name).and_then(serde_json::Value::as_f64);
            let b = row.get(name).and_then(serde_json::Value::as_f64);
            let folded = match (a, b) {
                (Some(a), Some(b)) => match rule {
                    Reaggregate::Sum => a + b,
                    Reaggregate::Min => a.min(b),
                    Reaggregate::Max => a.max(b),
                },
                (Some(v), None) | (None, Some(v)) => v,
                (None, None) => continue,
            };
            acc.insert(name.clone(), number_to_json(folded));
        }
    }
}

fn object(value: serde_json::Value) -> Option<Row> {
    match value {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Engines report dimension values as strings.
fn convert(value: &mut serde_json::Value, ty: PlyType) {
    let serde_json::Value::String(s) = value else {
        return;
    };
    let converted = match ty {
        PlyType::Number => s.parse::<f64>().ok().map(number_to_json),
        PlyType::Boolean => match s.as_str() {
            "true" => Some(serde_json::Value::Bool(true)),
            "false" => Some(serde_json::Value::Bool(false)),
            _ => None,
        },
        _ => None,
    };
    if let Some(v) = converted {
        *value = v;
    }
}

/// Nulls first, then booleans, numbers and strings in natural order.
fn compare_json(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Ordering {
    use serde_json::Value as J;
    fn rank(v: Option<&J>) -> u8 {
        match v {
            None | Some(J::Null) => 0,
            Some(J::Bool(_)) => 1,
            Some(J::Number(_)) => 2,
            Some(J::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(J::Bool(x)), Some(J::Bool(y))) => x.cmp(y),
        (Some(J::Number(x)), Some(J::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(J::String(x)), Some(J::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

// ============================================================================
// Plans
// ============================================================================

/// A dataset-valued apply, planned once its parent row is known.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedPlan {
    pub name: String,
    pub template: Expression,
}

impl NestedPlan {
    /// The template narrowed to the parent row's keys.
    pub fn bind(
        &self,
        split_keys: &BTreeMap<String, Expression>,
        row: &Row,
        external: &ExternalValue,
    ) -> CompileResult<Expression> {
        bind(&self.template, split_keys, row, external)
    }
}

/// One level of a query chain.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    /// `None` for a totals level whose every apply is nested.
    pub query: Option<NativeQuery>,
    pub post: PostProcess,
    pub split_keys: BTreeMap<String, Expression>,
    pub nested: Vec<NestedPlan>,
}

impl PlanNode {
    /// JSON description for display: the query and the nested templates.
    pub fn describe(&self) -> serde_json::Value {
        let nested: Vec<serde_json::Value> = self
            .nested
            .iter()
            .map(|n| {
                serde_json::json!({
                    "name": n.name,
                    "template": serde_json::to_value(&n.template).unwrap_or_default(),
                })
            })
            .collect();
        serde_json::json!({
            "query": self.query.as_ref().map(NativeQuery::to_json),
            "nested": nested,
        })
    }
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub external: Arc<ExternalValue>,
    pub root: PlanNode,
}

/// Plan the root level of `expression`; nested levels stay templates.
pub fn compile_plan(external: Arc<ExternalValue>, expression: &Expression) -> CompileResult<QueryPlan> {
    let root = plan_level(&external, expression)?;
    Ok(QueryPlan { external, root })
}

/// Plan one level of a chain.
pub fn plan_level(external: &ExternalValue, expression: &Expression) -> CompileResult<PlanNode> {
    let folded = fold(external, expression)?;
    let split_keys = folded
        .split
        .as_ref()
        .map(|s| s.keys.clone())
        .unwrap_or_default();
    let nested = folded
        .nested
        .iter()
        .map(|n| NestedPlan {
            name: n.name.clone(),
            template: n.expression.clone(),
        })
        .collect();

    let mut post = PostProcess {
        types: folded.types.clone(),
        split_keys: split_keys.keys().cloned().collect(),
        ..PostProcess::default()
    };
    let has_query = folded.mode != QueryMode::Total || !folded.applies.is_empty();
    let query = if !has_query {
        None
    } else if external.engine() == Engine::Druid {
        let plan = druid::plan(external, &folded)?;
        post.envelope = Envelope::of(&plan.query);
        post.timestamp_key = plan.timestamp_key;
        post.renames = plan.renames;
        post.sort = plan.client_sort;
        post.limit = plan.client_limit;
        Some(NativeQuery::Druid(plan.query))
    } else {
        let plan = sql::plan(external, &folded)?;
        post.client_keys = plan.client_keys;
        post.reaggregate = plan.reaggregate;
        post.sort = plan.client_sort;
        post.limit = plan.client_limit;
        Some(NativeQuery::Sql(plan.sql))
    };
    debug!(
        engine = %external.engine(),
        mode = ?folded.mode,
        nested = folded.nested.len(),
        "planned level"
    );
    Ok(PlanNode {
        query,
        post,
        split_keys,
        nested,
    })
}

/// Every descriptor the chain issues, nested levels bound to simulated rows.
///
/// Deterministic: the same inputs always give the same sequence.
pub fn compile(external: &ExternalValue, expression: &Expression) -> CompileResult<Vec<NativeQuery>> {
    let mut out = Vec::new();
    simulate(external, expression, &mut out)?;
    Ok(out)
}

fn simulate(
    external: &ExternalValue,
    expression: &Expression,
    out: &mut Vec<NativeQuery>,
) -> CompileResult<()> {
    let node = plan_level(external, expression)?;
    if let Some(query) = node.query {
        out.push(query);
    }
    if node.nested.is_empty() {
        return Ok(());
    }
    let row = simulated_row(&node.split_keys, external)?;
    for nested in &node.nested {
        let bound = nested.bind(&node.split_keys, &row, external)?;
        simulate(external, &bound, out)?;
    }
    Ok(())
}
