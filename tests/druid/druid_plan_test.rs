//! Integration tests for Druid query selection and assembly.

use chrono::{TimeZone, Utc};
use heron::compile::{compile, plan_level};
use heron::druid::planner::{GROUP_BY_LIMIT, TOP_N_THRESHOLD};
use heron::external::{CompileError, Engine, ExternalBuilder, ExternalValue, SortSpec};
use heron::model::{
    lit_num, lit_str, lit_time_range, ply, r, AttributeInfo, Duration, Expression, SortDirection,
    TimePart, Timezone,
};
use serde_json::json;

fn builder() -> ExternalBuilder {
    ExternalValue::builder(Engine::Druid, "diamonds")
        .time_attribute("time")
        .attributes([
            AttributeInfo::time("time"),
            AttributeInfo::string("color"),
            AttributeInfo::string("cut"),
            AttributeInfo::number("price"),
        ])
}

fn week_filter() -> Expression {
    r("time").is_in(lit_time_range(
        Some(Utc.with_ymd_and_hms(2015, 3, 12, 0, 0, 0).unwrap()),
        Some(Utc.with_ymd_and_hms(2015, 3, 19, 0, 0, 0).unwrap()),
    ))
}

fn external() -> ExternalValue {
    builder().filter(week_filter()).build().unwrap()
}

fn query_json(external: &ExternalValue, e: &Expression) -> serde_json::Value {
    let queries = compile(external, e).unwrap();
    assert_eq!(queries.len(), 1);
    queries[0].to_json()
}

// ============================================================================
// Query type selection
// ============================================================================

#[test]
fn test_sorted_limited_split_is_top_n() {
    let e = r("diamonds")
        .filter(r("color").is(lit_str("D")))
        .split_on("Cut", r("cut"), "data")
        .apply("Count", r("data").count())
        .sort(r("Count"), SortDirection::Descending)
        .limit(2);
    assert_eq!(
        query_json(&external(), &e),
        json!({
            "queryType": "topN",
            "dataSource": "diamonds",
            "intervals": "2015-03-12/2015-03-19",
            "granularity": "all",
            "filter": {"type": "selector", "dimension": "color", "value": "D"},
            "dimension": {"type": "default", "dimension": "cut", "outputName": "Cut"},
            "metric": "Count",
            "threshold": 2,
            "aggregations": [{"type": "count", "name": "Count"}]
        })
    );
}

#[test]
fn test_top_n_sorted_on_its_key() {
    let e = r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Count", r("data").count())
        .sort(r("Cut"), SortDirection::Ascending)
        .limit(5);
    let q = query_json(&external(), &e);
    assert_eq!(q["metric"], json!({"type": "lexicographic"}));

    let e = r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Count", r("data").count())
        .sort(r("Count"), SortDirection::Ascending)
        .limit(5);
    let q = query_json(&external(), &e);
    assert_eq!(q["metric"], json!({"type": "inverted", "metric": "Count"}));
}

#[test]
fn test_low_cardinality_key_is_top_n() {
    let e = r("diamonds")
        .split_on(
            "Hour",
            r("time").time_part(TimePart::HourOfDay, None),
            "data",
        )
        .apply("Count", r("data").count());
    let q = query_json(&external(), &e);
    assert_eq!(q["queryType"], "topN");
    assert_eq!(q["threshold"], TOP_N_THRESHOLD);
    assert_eq!(
        q["dimension"],
        json!({
            "type": "extraction",
            "dimension": "__time",
            "outputName": "Hour",
            "extractionFn": {
                "type": "timeFormat",
                "format": "H",
                "locale": "en-US",
                "timeZone": "Etc/UTC"
            }
        })
    );
}

#[test]
fn test_multi_key_split_is_group_by() {
    let e = r("diamonds")
        .split([("Color", r("color")), ("Cut", r("cut"))], "data")
        .apply("Count", r("data").count());
    assert_eq!(
        query_json(&external(), &e),
        json!({
            "queryType": "groupBy",
            "dataSource": "diamonds",
            "intervals": "2015-03-12/2015-03-19",
            "granularity": "all",
            "dimensions": [
                {"type": "default", "dimension": "color", "outputName": "Color"},
                {"type": "default", "dimension": "cut", "outputName": "Cut"}
            ],
            "aggregations": [{"type": "count", "name": "Count"}],
            "limitSpec": {"type": "default", "limit": GROUP_BY_LIMIT, "columns": ["Color"]}
        })
    );
}

#[test]
fn test_group_by_having() {
    let e = r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Count", r("data").count())
        .filter(r("Count").greater_than(lit_num(100.0)));
    let q = query_json(&external(), &e);
    assert_eq!(q["queryType"], "groupBy");
    assert_eq!(
        q["having"],
        json!({"type": "greaterThan", "aggregation": "Count", "value": 100})
    );
}

#[test]
fn test_group_by_sorted_on_numeric_key() {
    let e = r("diamonds")
        .split([("Color", r("color")), ("Price", r("price"))], "data")
        .apply("Count", r("data").count())
        .sort(r("Price"), SortDirection::Descending)
        .limit(10);
    let q = query_json(&external(), &e);
    assert_eq!(
        q["limitSpec"],
        json!({
            "type": "default",
            "limit": 10,
            "columns": [{"dimension": "Price", "direction": "descending", "dimensionOrder": "alphaNumeric"}]
        })
    );
}

#[test]
fn test_time_bucket_split_is_timeseries() {
    let la = Timezone::parse("America/Los_Angeles").unwrap();
    let e = r("diamonds")
        .split_on(
            "Day",
            r("time").time_bucket(Duration::parse("P1D").unwrap(), Some(la)),
            "data",
        )
        .apply("Price", r("data").sum(r("price")));
    assert_eq!(
        query_json(&external(), &e),
        json!({
            "queryType": "timeseries",
            "dataSource": "diamonds",
            "intervals": "2015-03-12/2015-03-19",
            "granularity": {"type": "period", "period": "P1D", "timeZone": "America/Los_Angeles"},
            "aggregations": [{"type": "doubleSum", "name": "Price", "fieldName": "price"}],
            "context": {"skipEmptyBuckets": "true"}
        })
    );
}

#[test]
fn test_timeseries_sort_and_limit_run_client_side() {
    let external = builder()
        .filter(week_filter())
        .context("timeout", json!(10000))
        .build()
        .unwrap();
    let e = r("diamonds")
        .split_on(
            "Day",
            r("time").time_bucket(Duration::parse("P1D").unwrap(), None),
            "data",
        )
        .apply("Count", r("data").count())
        .sort(r("Count"), SortDirection::Descending)
        .limit(3);
    let node = plan_level(&external, &e).unwrap();
    let q = node.query.unwrap().to_json();
    assert_eq!(
        q["context"],
        json!({"timeout": 10000, "skipEmptyBuckets": "true"})
    );
    assert_eq!(node.post.timestamp_key.as_deref(), Some("Day"));
    assert_eq!(
        node.post.sort,
        Some(SortSpec {
            name: "Count".into(),
            direction: SortDirection::Descending
        })
    );
    assert_eq!(node.post.limit, Some(3));
}

// ============================================================================
// Totals
// ============================================================================

#[test]
fn test_time_extreme_is_time_boundary() {
    let external = builder().build().unwrap();
    let e = ply().apply("MaxTime", r("diamonds").max(r("time")));
    assert_eq!(
        query_json(&external, &e),
        json!({"queryType": "timeBoundary", "dataSource": "diamonds", "bound": "maxTime"})
    );

    let node = plan_level(&external, &e).unwrap();
    assert_eq!(node.post.renames["maxTime"], "MaxTime");
}

#[test]
fn test_filtered_time_extreme_is_timeseries() {
    let e = ply().apply("MaxTime", r("diamonds").max(r("time")));
    let q = query_json(&external(), &e);
    assert_eq!(q["queryType"], "timeseries");
    assert_eq!(
        q["aggregations"],
        json!([{"type": "longMax", "name": "MaxTime", "fieldName": "__time"}])
    );
}

#[test]
fn test_average_becomes_post_aggregation() {
    let e = ply().apply("AvgPrice", r("diamonds").average(r("price")));
    let q = query_json(&external(), &e);
    assert_eq!(q["queryType"], "timeseries");
    assert_eq!(q["granularity"], "all");

    let aggregations = q["aggregations"].as_array().unwrap();
    assert_eq!(aggregations.len(), 2);
    assert!(aggregations
        .iter()
        .any(|a| a["type"] == "doubleSum" && a["fieldName"] == "price"));
    assert!(aggregations.iter().any(|a| a["type"] == "count"));

    let post = &q["postAggregations"][0];
    assert_eq!(post["type"], "arithmetic");
    assert_eq!(post["name"], "AvgPrice");
    assert_eq!(post["fn"], "/");
    assert_eq!(post["fields"][0]["type"], "fieldAccess");
}

#[test]
fn test_custom_aggregation_passes_through() {
    let external = builder()
        .filter(week_filter())
        .custom_aggregation("crazy", json!({"type": "crazy", "the": "borg"}))
        .build()
        .unwrap();
    let e = r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Crazy", r("data").custom_aggregate("crazy"))
        .limit(10);
    let q = query_json(&external, &e);
    assert_eq!(
        q["aggregations"],
        json!([{"type": "crazy", "the": "borg", "name": "Crazy"}])
    );

    let e = r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Missing", r("data").custom_aggregate("missing"));
    assert!(matches!(
        compile(&external, &e),
        Err(CompileError::UnsupportedAggregate(_))
    ));
}

// ============================================================================
// Raw rows
// ============================================================================

#[test]
fn test_raw_rows_use_select() {
    let external = builder()
        .filter(week_filter())
        .allow_select_queries(true)
        .build()
        .unwrap();
    assert_eq!(
        query_json(&external, &r("diamonds").limit(10)),
        json!({
            "queryType": "select",
            "dataSource": "diamonds",
            "intervals": "2015-03-12/2015-03-19",
            "granularity": "all",
            "dimensions": ["color", "cut", "price"],
            "metrics": [],
            "pagingSpec": {"pagingIdentifiers": {}, "threshold": 10}
        })
    );
}

#[test]
fn test_raw_rows_need_permission() {
    assert!(compile(&external(), &r("diamonds").limit(10)).is_err());
}
