//! Integration tests for Druid filters and interval lifting.

use chrono::{DateTime, TimeZone, Utc};
use heron::compile::compile;
use heron::external::{Engine, ExternalValue};
use heron::model::{
    lit, lit_null, lit_num, lit_number_range, lit_set_str, lit_str, lit_time, lit_time_range, r,
    AttributeInfo, Expression, Set, TimeRange, Value,
};
use serde_json::json;

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015, 3, d, 0, 0, 0).unwrap()
}

fn external() -> ExternalValue {
    ExternalValue::builder(Engine::Druid, "diamonds")
        .time_attribute("time")
        .attributes([
            AttributeInfo::time("time"),
            AttributeInfo::string("color"),
            AttributeInfo::string("cut"),
            AttributeInfo::number("price"),
        ])
        .filter(r("time").is_in(lit_time_range(Some(day(12)), Some(day(19)))))
        .build()
        .unwrap()
}

/// The timeseries query counting rows that pass `f`.
fn count_where(f: Expression) -> serde_json::Value {
    let queries = compile(&external(), &r("diamonds").filter(f).count()).unwrap();
    queries[0].to_json()
}

fn filter_of(f: Expression) -> serde_json::Value {
    count_where(f)["filter"].clone()
}

// ============================================================================
// Value filters
// ============================================================================

#[test]
fn test_equality_is_selector() {
    assert_eq!(
        filter_of(r("color").is(lit_str("D"))),
        json!({"type": "selector", "dimension": "color", "value": "D"})
    );
    assert_eq!(
        filter_of(r("color").is(lit_null())),
        json!({"type": "selector", "dimension": "color", "value": null})
    );
}

#[test]
fn test_set_membership_is_or_of_selectors() {
    assert_eq!(
        filter_of(r("color").is_in(lit_set_str(["D", "E"]))),
        json!({
            "type": "or",
            "fields": [
                {"type": "selector", "dimension": "color", "value": "D"},
                {"type": "selector", "dimension": "color", "value": "E"}
            ]
        })
    );
    assert_eq!(
        filter_of(r("color").is_in(lit_set_str(["D"]))),
        json!({"type": "selector", "dimension": "color", "value": "D"})
    );
}

#[test]
fn test_number_range_is_bound() {
    assert_eq!(
        filter_of(r("price").is_in(lit_number_range(Some(1000.0), Some(2000.0)))),
        json!({
            "type": "bound",
            "dimension": "price",
            "lower": "1000",
            "upper": "2000",
            "upperStrict": true,
            "ordering": "numeric"
        })
    );
    assert_eq!(
        filter_of(r("price").greater_than(lit_num(500.0))),
        json!({
            "type": "bound",
            "dimension": "price",
            "lower": "500",
            "lowerStrict": true,
            "ordering": "numeric"
        })
    );
}

#[test]
fn test_string_matching() {
    assert_eq!(
        filter_of(r("cut").contains_ignore_case(lit_str("ide"))),
        json!({
            "type": "search",
            "dimension": "cut",
            "query": {"type": "fragment", "values": ["ide"]}
        })
    );
    assert_eq!(
        filter_of(r("cut").matches("^G")),
        json!({"type": "regex", "dimension": "cut", "pattern": "^G"})
    );
}

#[test]
fn test_negation_and_conjunction() {
    assert_eq!(
        filter_of(!r("cut").is(lit_str("Good"))),
        json!({
            "type": "not",
            "field": {"type": "selector", "dimension": "cut", "value": "Good"}
        })
    );
    assert_eq!(
        filter_of(r("cut").is(lit_str("Good")).and(r("color").is(lit_str("D")))),
        json!({
            "type": "and",
            "fields": [
                {"type": "selector", "dimension": "cut", "value": "Good"},
                {"type": "selector", "dimension": "color", "value": "D"}
            ]
        })
    );
}

#[test]
fn test_equality_and_tag_overlap() {
    let external = ExternalValue::builder(Engine::Druid, "diamonds")
        .time_attribute("time")
        .attributes([
            AttributeInfo::time("time"),
            AttributeInfo::string("color"),
            AttributeInfo::set_string("tags"),
            AttributeInfo::number("price"),
        ])
        .build()
        .unwrap();
    let filter = r("color")
        .is(lit_str("D"))
        .and(r("tags").overlap(lit_set_str(["Good", "Bad", "Ugly"])));
    let queries = compile(&external, &r("diamonds").filter(filter).count()).unwrap();
    assert_eq!(
        queries[0].to_json()["filter"],
        json!({
            "type": "and",
            "fields": [
                {"type": "selector", "dimension": "color", "value": "D"},
                {
                    "type": "or",
                    "fields": [
                        {"type": "selector", "dimension": "tags", "value": "Good"},
                        {"type": "selector", "dimension": "tags", "value": "Bad"},
                        {"type": "selector", "dimension": "tags", "value": "Ugly"}
                    ]
                }
            ]
        })
    );
}

// ============================================================================
// Time
// ============================================================================

#[test]
fn test_time_comparison_narrows_intervals() {
    let q = count_where(r("time").less_than(lit_time(day(14))));
    assert_eq!(q["intervals"], "2015-03-12/2015-03-14");
    assert!(q.get("filter").is_none());
}

#[test]
fn test_time_set_becomes_interval_list() {
    let ranges = Set::time_ranges(vec![
        TimeRange::new(day(13), day(14)),
        TimeRange::new(day(15), day(16)),
    ]);
    let q = count_where(r("time").is_in(lit(Value::Set(ranges))));
    assert_eq!(
        q["intervals"],
        json!(["2015-03-13/2015-03-14", "2015-03-15/2015-03-16"])
    );
}

#[test]
fn test_disjoint_time_ranges_scan_an_empty_interval() {
    let e = r("diamonds")
        .filter(r("time").is_in(lit_time_range(Some(day(20)), Some(day(21)))))
        .sum(r("price"));
    let queries = compile(&external(), &e).unwrap();
    assert_eq!(
        queries[0].to_json(),
        json!({
            "queryType": "timeseries",
            "dataSource": "diamonds",
            "intervals": "1000-01-01/1000-01-01",
            "granularity": "all",
            "aggregations": [{"type": "doubleSum", "name": "__VALUE__", "fieldName": "price"}]
        })
    );
}

#[test]
fn test_unfiltered_external_uses_open_interval() {
    let external = ExternalValue::builder(Engine::Druid, "diamonds")
        .time_attribute("time")
        .attributes([AttributeInfo::time("time"), AttributeInfo::number("price")])
        .build()
        .unwrap();
    let queries = compile(&external, &r("diamonds").sum(r("price"))).unwrap();
    assert_eq!(queries[0].to_json()["intervals"], "1000-01-01/3000-01-01");
}

// ============================================================================
// Aggregator filters
// ============================================================================

#[test]
fn test_filtered_apply_becomes_filtered_aggregator() {
    let e = r("diamonds")
        .split_on("Color", r("color"), "data")
        .apply("Good", r("data").filter(r("cut").is(lit_str("Good"))).count())
        .limit(5);
    let queries = compile(&external(), &e).unwrap();
    assert_eq!(
        queries[0].to_json()["aggregations"],
        json!([{
            "type": "filtered",
            "name": "Good",
            "filter": {"type": "selector", "dimension": "cut", "value": "Good"},
            "aggregator": {"type": "count", "name": "Good"}
        }])
    );
}
