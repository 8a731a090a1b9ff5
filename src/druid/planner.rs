//! Choosing the Druid query type for a folded query and assembling it.
//!
//! | folded shape                                   | query          |
//! |------------------------------------------------|----------------|
//! | raw rows                                       | `select`       |
//! | totals that are only min/max of time           | `timeBoundary` |
//! | totals / single value                          | `timeseries`   |
//! | one time-bucket key                            | `timeseries`   |
//! | one key with a limit, or a low-cardinality key | `topN`         |
//! | everything else                                | `groupBy`      |
//!
//! Whatever a query type cannot do server-side (sorting timeseries buckets,
//! limiting them) is handed back as client-side post-processing.

use std::collections::BTreeMap;

use tracing::debug;

use super::aggregation::{having_spec, AggregationBuilder};
use super::extraction::dimension_source;
use super::filter::{FilterBuilder, FilterContext};
use super::query::{
    Aggregation, DimensionSpec, DruidQuery, Filter, Granularity, GranularitySpec, GroupByQuery, HavingSpec,
    Intervals, LimitSpec, OrderByColumn, OrderByColumnSpec, PagingSpec, PostAggregation, SelectQuery,
    TimeBoundaryQuery, TimeseriesQuery, TopNMetric, TopNMetricSpec, TopNQuery,
};
use crate::external::aggregate::AggregateSet;
use crate::external::time_filter::{druid_intervals, split_time_filter};
use crate::external::{CompileError, CompileResult, ExternalValue, FoldedQuery, QueryMode, SortSpec};
use crate::model::{Duration, Expression, PlyType, SortDirection, Timezone};

/// Row cap for groupBy queries without a limit.
pub const GROUP_BY_LIMIT: u64 = 500_000;
/// topN threshold for unlimited splits on low-cardinality keys.
pub const TOP_N_THRESHOLD: u64 = 1000;
/// Page size for select queries without a limit.
pub const SELECT_THRESHOLD: u64 = 10_000;

type Context = serde_json::Map<String, serde_json::Value>;

/// A Druid query plus the work left to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct DruidPlan {
    pub query: DruidQuery,
    /// Output name Druid's row `timestamp` is reported under.
    pub timestamp_key: Option<String>,
    /// Druid result fields renamed to output names.
    pub renames: BTreeMap<String, String>,
    pub client_sort: Option<SortSpec>,
    pub client_limit: Option<u64>,
}

impl DruidPlan {
    fn new(query: DruidQuery) -> Self {
        Self {
            query,
            timestamp_key: None,
            renames: BTreeMap::new(),
            client_sort: None,
            client_limit: None,
        }
    }
}

pub fn plan(external: &ExternalValue, folded: &FoldedQuery) -> CompileResult<DruidPlan> {
    Planner::new(external, folded)?.plan()
}

struct Planner<'a> {
    external: &'a ExternalValue,
    folded: &'a FoldedQuery,
    intervals: Intervals,
    filter: Option<Filter>,
    set: AggregateSet,
}

impl<'a> Planner<'a> {
    fn new(external: &'a ExternalValue, folded: &'a FoldedQuery) -> CompileResult<Self> {
        let time = split_time_filter(&folded.filter, external.time_attribute());
        let intervals = druid_intervals(time.intervals.as_deref());
        let filter = FilterBuilder::new(external, FilterContext::Query).build(&time.rest)?;
        Ok(Self {
            external,
            folded,
            intervals: Intervals::from_list(intervals),
            filter,
            set: AggregateSet::collect(&folded.applies),
        })
    }

    fn plan(self) -> CompileResult<DruidPlan> {
        let plan = match self.folded.mode {
            QueryMode::Raw => self.select()?,
            QueryMode::Value | QueryMode::Total => match self.time_boundary() {
                Some(plan) => plan,
                None => self.totals()?,
            },
            QueryMode::Split => self.split()?,
        };
        debug!(
            query_type = plan.query.query_type(),
            data_source = plan.query.data_source(),
            "planned druid query"
        );
        Ok(plan)
    }

    fn context(&self) -> Option<Context> {
        let context = self.external.context();
        (!context.is_empty()).then(|| context.clone())
    }

    fn aggregations(&self) -> CompileResult<(Vec<Aggregation>, Vec<PostAggregation>)> {
        let builder = AggregationBuilder::new(self.external, &self.set);
        Ok((builder.aggregations()?, builder.post_aggregations()?))
    }

    // ------------------------------------------------------------------------
    // select
    // ------------------------------------------------------------------------

    fn select(&self) -> CompileResult<DruidPlan> {
        if !self.external.allow_select_queries() {
            return Err(CompileError::unsupported(
                "raw rows from druid without allowSelectQueries",
            ));
        }
        let non_time = self
            .external
            .attributes()
            .iter()
            .filter(|a| !self.external.is_time_attribute(&a.name));
        let (metrics, dimensions): (Vec<_>, Vec<_>) = non_time.partition(|a| a.unsplitable);
        let query = DruidQuery::Select(SelectQuery {
            data_source: self.external.source().into(),
            intervals: self.intervals.clone(),
            granularity: Granularity::all(),
            filter: self.filter.clone(),
            dimensions: dimensions.into_iter().map(|a| a.name.clone()).collect(),
            metrics: metrics.into_iter().map(|a| a.name.clone()).collect(),
            paging_spec: PagingSpec {
                paging_identifiers: serde_json::Map::new(),
                threshold: self.folded.limit.unwrap_or(SELECT_THRESHOLD),
            },
            context: self.context(),
        });
        let mut plan = DruidPlan::new(query);
        plan.timestamp_key = self.external.time_attribute().map(str::to_string);
        plan.client_sort = self.folded.sort.clone();
        Ok(plan)
    }

    // ------------------------------------------------------------------------
    // totals
    // ------------------------------------------------------------------------

    /// Totals asking only for the extremes of the time attribute.
    fn time_boundary(&self) -> Option<DruidPlan> {
        if self.folded.applies.is_empty() || !self.folded.filter.is_literal_true() {
            return None;
        }
        let mut renames = BTreeMap::new();
        for apply in &self.folded.applies {
            let (field, expression, operand) = match &apply.expression {
                Expression::Max {
                    operand,
                    expression,
                } => ("maxTime", expression, operand),
                Expression::Min {
                    operand,
                    expression,
                } => ("minTime", expression, operand),
                _ => return None,
            };
            let on_time = expression
                .as_ref_name()
                .is_some_and(|n| self.external.is_time_attribute(n));
            if !on_time || operand.as_ref_name().is_none() || renames.contains_key(field) {
                return None;
            }
            renames.insert(field.to_string(), apply.name.clone());
        }
        let bound = match renames.len() {
            1 => renames.keys().next().cloned(),
            _ => None,
        };
        let mut plan = DruidPlan::new(DruidQuery::TimeBoundary(TimeBoundaryQuery {
            data_source: self.external.source().into(),
            bound,
            context: self.context(),
        }));
        plan.renames = renames;
        Some(plan)
    }

    fn totals(&self) -> CompileResult<DruidPlan> {
        let (aggregations, post_aggregations) = self.aggregations()?;
        Ok(DruidPlan::new(DruidQuery::Timeseries(TimeseriesQuery {
            data_source: self.external.source().into(),
            intervals: self.intervals.clone(),
            granularity: Granularity::all(),
            filter: self.filter.clone(),
            aggregations,
            post_aggregations,
            context: self.context(),
        })))
    }

    // ------------------------------------------------------------------------
    // splits
    // ------------------------------------------------------------------------

    fn split(&self) -> CompileResult<DruidPlan> {
        let split = self
            .folded
            .split
            .as_ref()
            .ok_or_else(|| CompileError::unsupported("split query without keys"))?;
        let having = match &self.folded.having {
            Some(h) if h.after_limit => {
                return Err(CompileError::UnsupportedHaving(
                    "filter after limit on a split".into(),
                ))
            }
            Some(h) => Some(having_spec(&h.expression)?),
            None => None,
        };

        if let Some((name, key)) = split.single_key() {
            if let Some((duration, timezone)) = self.time_bucket(key) {
                if having.is_some() {
                    return Err(CompileError::UnsupportedHaving(
                        "filter on a time-bucketed split".into(),
                    ));
                }
                return self.timeseries(name, duration, timezone);
            }
            if having.is_none() && (self.folded.limit.is_some() || self.low_cardinality(key)) {
                return self.top_n(name, key);
            }
        }
        self.group_by(&split.keys, having)
    }

    fn time_bucket<'k>(&self, key: &'k Expression) -> Option<(&'k Duration, Option<Timezone>)> {
        match key {
            Expression::TimeBucket {
                operand,
                duration,
                timezone,
            } if operand
                .as_ref_name()
                .is_some_and(|n| self.external.is_time_attribute(n)) =>
            {
                Some((duration, *timezone))
            }
            _ => None,
        }
    }

    fn key_type(&self, key: &Expression) -> Option<PlyType> {
        key.infer_type(&|n| self.external.attribute_type(n)).ok()
    }

    fn low_cardinality(&self, key: &Expression) -> bool {
        match key {
            Expression::TimePart { part, .. } => part
                .cardinality()
                .is_some_and(|c| u64::from(c) <= TOP_N_THRESHOLD),
            other => self.key_type(other) == Some(PlyType::Boolean),
        }
    }

    fn timeseries(
        &self,
        name: &str,
        duration: &Duration,
        timezone: Option<Timezone>,
    ) -> CompileResult<DruidPlan> {
        let (aggregations, post_aggregations) = self.aggregations()?;
        let mut context = self.context().unwrap_or_default();
        context
            .entry("skipEmptyBuckets")
            .or_insert_with(|| serde_json::Value::String("true".into()));
        let query = DruidQuery::Timeseries(TimeseriesQuery {
            data_source: self.external.source().into(),
            intervals: self.intervals.clone(),
            granularity: period(duration, timezone),
            filter: self.filter.clone(),
            aggregations,
            post_aggregations,
            context: Some(context),
        });
        let mut plan = DruidPlan::new(query);
        plan.timestamp_key = Some(name.into());
        plan.client_sort = self.folded.sort.clone();
        plan.client_limit = self.folded.limit;
        Ok(plan)
    }

    fn top_n(&self, name: &str, key: &Expression) -> CompileResult<DruidPlan> {
        let (aggregations, post_aggregations) = self.aggregations()?;
        let metric = match &self.folded.sort {
            None => TopNMetric::Spec(TopNMetricSpec::Lexicographic),
            Some(sort) if sort.name == name => {
                let ordering = if self.key_type(key) == Some(PlyType::Number) {
                    TopNMetricSpec::AlphaNumeric
                } else {
                    TopNMetricSpec::Lexicographic
                };
                let metric = TopNMetric::Spec(ordering);
                match sort.direction {
                    SortDirection::Ascending => metric,
                    SortDirection::Descending => metric.inverted(),
                }
            }
            Some(sort) => {
                let metric = TopNMetric::Name(sort.name.clone());
                match sort.direction {
                    SortDirection::Ascending => metric.inverted(),
                    SortDirection::Descending => metric,
                }
            }
        };
        let query = DruidQuery::TopN(TopNQuery {
            data_source: self.external.source().into(),
            intervals: self.intervals.clone(),
            granularity: Granularity::all(),
            filter: self.filter.clone(),
            dimension: dimension_source(key, self.external)?.into_dimension_spec(name),
            metric,
            threshold: self.folded.limit.unwrap_or(TOP_N_THRESHOLD),
            aggregations,
            post_aggregations,
            context: self.context(),
        });
        Ok(DruidPlan::new(query))
    }

    fn group_by(
        &self,
        keys: &BTreeMap<String, Expression>,
        having: Option<HavingSpec>,
    ) -> CompileResult<DruidPlan> {
        let (aggregations, post_aggregations) = self.aggregations()?;

        let lifted = match self.folded.limit {
            None if keys.len() > 1 => keys
                .iter()
                .find_map(|(name, key)| self.time_bucket(key).map(|b| (name.as_str(), b))),
            _ => None,
        };
        let granularity = match lifted {
            Some((_, (duration, timezone))) => period(duration, timezone),
            None => Granularity::all(),
        };

        let mut dimensions: Vec<DimensionSpec> = Vec::with_capacity(keys.len());
        for (name, key) in keys {
            if lifted.is_some_and(|(lifted_name, _)| lifted_name == name.as_str()) {
                continue;
            }
            dimensions.push(dimension_source(key, self.external)?.into_dimension_spec(name));
        }

        let columns = match &self.folded.sort {
            Some(sort) => {
                let numeric_key = keys
                    .get(&sort.name)
                    .is_some_and(|k| self.key_type(k) == Some(PlyType::Number));
                vec![OrderByColumn::Spec(OrderByColumnSpec {
                    dimension: sort.name.clone(),
                    direction: direction_name(sort.direction).into(),
                    dimension_order: numeric_key.then(|| "alphaNumeric".to_string()),
                })]
            }
            None => dimensions
                .first()
                .map(|d| vec![OrderByColumn::Name(d.output_name().to_string())])
                .unwrap_or_default(),
        };

        let query = DruidQuery::GroupBy(GroupByQuery {
            data_source: self.external.source().into(),
            intervals: self.intervals.clone(),
            granularity,
            filter: self.filter.clone(),
            dimensions,
            aggregations,
            post_aggregations,
            having,
            limit_spec: LimitSpec::Default {
                limit: self.folded.limit.unwrap_or(GROUP_BY_LIMIT),
                columns,
            },
            context: self.context(),
        });
        let mut plan = DruidPlan::new(query);
        plan.timestamp_key = lifted.map(|(name, _)| name.to_string());
        Ok(plan)
    }
}

fn period(duration: &Duration, timezone: Option<Timezone>) -> Granularity {
    Granularity::Spec(GranularitySpec::Period {
        period: duration.to_string(),
        time_zone: timezone.unwrap_or_default().name().into(),
    })
}

fn direction_name(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Ascending => "ascending",
        SortDirection::Descending => "descending",
    }
}
