//! Serde model of the Druid native query JSON.
//!
//! Only the shapes the planner emits are modelled. Optional members are
//! skipped when absent so the serialized JSON carries exactly the keys Druid
//! expects for each query type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

type Context = serde_json::Map<String, serde_json::Value>;

/// A native Druid query, tagged by `queryType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "queryType", rename_all = "camelCase")]
pub enum DruidQuery {
    Timeseries(TimeseriesQuery),
    TopN(TopNQuery),
    GroupBy(GroupByQuery),
    Select(SelectQuery),
    TimeBoundary(TimeBoundaryQuery),
}

impl DruidQuery {
    pub fn query_type(&self) -> &'static str {
        match self {
            DruidQuery::Timeseries(_) => "timeseries",
            DruidQuery::TopN(_) => "topN",
            DruidQuery::GroupBy(_) => "groupBy",
            DruidQuery::Select(_) => "select",
            DruidQuery::TimeBoundary(_) => "timeBoundary",
        }
    }

    pub fn data_source(&self) -> &str {
        match self {
            DruidQuery::Timeseries(q) => &q.data_source,
            DruidQuery::TopN(q) => &q.data_source,
            DruidQuery::GroupBy(q) => &q.data_source,
            DruidQuery::Select(q) => &q.data_source,
            DruidQuery::TimeBoundary(q) => &q.data_source,
        }
    }

    pub fn context(&self) -> Option<&Context> {
        match self {
            DruidQuery::Timeseries(q) => q.context.as_ref(),
            DruidQuery::TopN(q) => q.context.as_ref(),
            DruidQuery::GroupBy(q) => q.context.as_ref(),
            DruidQuery::Select(q) => q.context.as_ref(),
            DruidQuery::TimeBoundary(q) => q.context.as_ref(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesQuery {
    pub data_source: String,
    pub intervals: Intervals,
    pub granularity: Granularity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    pub aggregations: Vec<Aggregation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_aggregations: Vec<PostAggregation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopNQuery {
    pub data_source: String,
    pub intervals: Intervals,
    pub granularity: Granularity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    pub dimension: DimensionSpec,
    pub metric: TopNMetric,
    pub threshold: u64,
    pub aggregations: Vec<Aggregation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_aggregations: Vec<PostAggregation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupByQuery {
    pub data_source: String,
    pub intervals: Intervals,
    pub granularity: Granularity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    pub dimensions: Vec<DimensionSpec>,
    pub aggregations: Vec<Aggregation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_aggregations: Vec<PostAggregation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<HavingSpec>,
    pub limit_spec: LimitSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectQuery {
    pub data_source: String,
    pub intervals: Intervals,
    pub granularity: Granularity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    pub paging_spec: PagingSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBoundaryQuery {
    pub data_source: String,
    /// `minTime` or `maxTime` when only one bound is needed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagingSpec {
    pub paging_identifiers: serde_json::Map<String, serde_json::Value>,
    pub threshold: u64,
}

// ============================================================================
// Intervals and granularity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Intervals {
    One(String),
    Many(Vec<String>),
}

impl Intervals {
    pub fn from_list(mut list: Vec<String>) -> Intervals {
        if list.len() == 1 {
            Intervals::One(list.remove(0))
        } else {
            Intervals::Many(list)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Granularity {
    Simple(String),
    Spec(GranularitySpec),
}

impl Granularity {
    pub fn all() -> Granularity {
        Granularity::Simple("all".into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GranularitySpec {
    Period { period: String, time_zone: String },
}

// ============================================================================
// Dimensions and extraction functions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DimensionSpec {
    Default {
        dimension: String,
        output_name: String,
    },
    Extraction {
        dimension: String,
        output_name: String,
        extraction_fn: ExtractionFn,
    },
}

impl DimensionSpec {
    pub fn output_name(&self) -> &str {
        match self {
            DimensionSpec::Default { output_name, .. }
            | DimensionSpec::Extraction { output_name, .. } => output_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ExtractionFn {
    Regex {
        expr: String,
        replace_missing_value: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replace_missing_value_with: Option<String>,
    },
    Substring {
        index: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        length: Option<i64>,
    },
    Lookup {
        lookup: LookupSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replace_missing_value_with: Option<String>,
    },
    TimeFormat {
        format: String,
        locale: String,
        time_zone: String,
    },
    Javascript {
        function: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        injective: Option<bool>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LookupSpec {
    Namespace { namespace: String },
    Map { map: BTreeMap<String, String> },
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Filter {
    Selector {
        dimension: String,
        value: Option<String>,
    },
    Extraction {
        dimension: String,
        value: Option<String>,
        extraction_fn: ExtractionFn,
    },
    And {
        fields: Vec<Filter>,
    },
    Or {
        fields: Vec<Filter>,
    },
    Not {
        field: Box<Filter>,
    },
    Regex {
        dimension: String,
        pattern: String,
    },
    Search {
        dimension: String,
        query: SearchQuerySpec,
    },
    Javascript {
        dimension: String,
        function: String,
    },
    Bound {
        dimension: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lower: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        upper: Option<String>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        lower_strict: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        upper_strict: bool,
        ordering: String,
    },
    Interval {
        dimension: String,
        intervals: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SearchQuerySpec {
    Fragment { values: Vec<String> },
}

// ============================================================================
// Aggregations
// ============================================================================

/// A generated aggregator or an engine-specific one passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Aggregation {
    Native(NativeAggregation),
    Custom(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum NativeAggregation {
    Count {
        name: String,
    },
    DoubleSum {
        name: String,
        field_name: String,
    },
    DoubleMin {
        name: String,
        field_name: String,
    },
    DoubleMax {
        name: String,
        field_name: String,
    },
    LongMin {
        name: String,
        field_name: String,
    },
    LongMax {
        name: String,
        field_name: String,
    },
    Cardinality {
        name: String,
        field_names: Vec<String>,
        by_row: bool,
    },
    HyperUnique {
        name: String,
        field_name: String,
    },
    Javascript {
        name: String,
        field_names: Vec<String>,
        fn_aggregate: String,
        fn_combine: String,
        fn_reset: String,
    },
    Filtered {
        name: String,
        filter: Filter,
        aggregator: Box<Aggregation>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PostAggregation {
    Arithmetic {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(rename = "fn")]
        func: String,
        fields: Vec<PostAggregation>,
    },
    FieldAccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        field_name: String,
    },
    HyperUniqueCardinality {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        field_name: String,
    },
    Constant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        value: serde_json::Value,
    },
    Javascript {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        field_names: Vec<String>,
        function: String,
    },
}

impl PostAggregation {
    pub fn with_name(mut self, new_name: &str) -> PostAggregation {
        match &mut self {
            PostAggregation::Arithmetic { name, .. }
            | PostAggregation::FieldAccess { name, .. }
            | PostAggregation::HyperUniqueCardinality { name, .. }
            | PostAggregation::Constant { name, .. }
            | PostAggregation::Javascript { name, .. } => *name = Some(new_name.into()),
        }
        self
    }
}

// ============================================================================
// groupBy ordering and having
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LimitSpec {
    Default {
        limit: u64,
        columns: Vec<OrderByColumn>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderByColumn {
    Name(String),
    Spec(OrderByColumnSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderByColumnSpec {
    pub dimension: String,
    pub direction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension_order: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HavingSpec {
    GreaterThan {
        aggregation: String,
        value: serde_json::Value,
    },
    LessThan {
        aggregation: String,
        value: serde_json::Value,
    },
    EqualTo {
        aggregation: String,
        value: serde_json::Value,
    },
    And {
        having_specs: Vec<HavingSpec>,
    },
    Or {
        having_specs: Vec<HavingSpec>,
    },
    Not {
        having_spec: Box<HavingSpec>,
    },
}

// ============================================================================
// topN ordering
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopNMetric {
    Name(String),
    Spec(TopNMetricSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TopNMetricSpec {
    Inverted { metric: Box<TopNMetric> },
    AlphaNumeric,
    Lexicographic,
}

impl TopNMetric {
    pub fn inverted(self) -> TopNMetric {
        TopNMetric::Spec(TopNMetricSpec::Inverted {
            metric: Box::new(self),
        })
    }
}
