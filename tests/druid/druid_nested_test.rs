//! Integration tests for nested splits compiled against Druid.
//!
//! A nested apply is issued once per parent row; `compile` binds it to a
//! simulated row, so these tests check how parent keys narrow the child.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use heron::compile::{compile, compile_plan};
use heron::external::{Engine, ExternalValue};
use heron::model::{lit_time_range, ply, r, AttributeInfo, Duration, SortDirection};
use serde_json::json;

fn external() -> ExternalValue {
    ExternalValue::builder(Engine::Druid, "diamonds")
        .time_attribute("time")
        .attributes([
            AttributeInfo::time("time"),
            AttributeInfo::string("color"),
            AttributeInfo::string("cut"),
            AttributeInfo::number("price"),
        ])
        .filter(r("time").is_in(lit_time_range(
            Some(Utc.with_ymd_and_hms(2015, 3, 12, 0, 0, 0).unwrap()),
            Some(Utc.with_ymd_and_hms(2015, 3, 19, 0, 0, 0).unwrap()),
        )))
        .build()
        .unwrap()
}

#[test]
fn test_child_is_narrowed_to_parent_key() {
    let e = r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Count", r("data").count())
        .sort(r("Count"), SortDirection::Descending)
        .limit(2)
        .apply(
            "Colors",
            r("data")
                .split_on("Color", r("color"), "colorData")
                .apply("Price", r("colorData").sum(r("price")))
                .sort(r("Price"), SortDirection::Descending)
                .limit(3),
        );

    let queries = compile(&external(), &e).unwrap();
    assert_eq!(queries.len(), 2);

    let parent = queries[0].to_json();
    assert_eq!(parent["queryType"], "topN");
    assert_eq!(parent["dimension"]["outputName"], "Cut");
    assert!(parent.get("filter").is_none());

    assert_eq!(
        queries[1].to_json(),
        json!({
            "queryType": "topN",
            "dataSource": "diamonds",
            "intervals": "2015-03-12/2015-03-19",
            "granularity": "all",
            "filter": {"type": "selector", "dimension": "cut", "value": "some_cut"},
            "dimension": {"type": "default", "dimension": "color", "outputName": "Color"},
            "metric": "Price",
            "threshold": 3,
            "aggregations": [{"type": "doubleSum", "name": "Price", "fieldName": "price"}]
        })
    );
}

#[test]
fn test_time_bucket_parent_narrows_child_intervals() {
    let e = r("diamonds")
        .split_on(
            "Day",
            r("time").time_bucket(Duration::parse("P1D").unwrap(), None),
            "data",
        )
        .apply("Count", r("data").count())
        .apply(
            "Cuts",
            r("data")
                .split_on("Cut", r("cut"), "cutData")
                .apply("Count", r("cutData").count())
                .limit(5),
        );

    let queries = compile(&external(), &e).unwrap();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].to_json()["queryType"], "timeseries");

    let child = queries[1].to_json();
    assert_eq!(child["queryType"], "topN");
    assert_eq!(child["intervals"], "2015-03-14/2015-03-15");
    assert!(child.get("filter").is_none());
}

#[test]
fn test_totals_with_only_nested_applies() {
    let e = ply().apply(
        "Cuts",
        r("diamonds")
            .split_on("Cut", r("cut"), "data")
            .apply("Count", r("data").count())
            .limit(5),
    );
    let plan = compile_plan(Arc::new(external()), &e).unwrap();
    assert!(plan.root.query.is_none());
    assert_eq!(plan.root.nested.len(), 1);
    assert_eq!(plan.root.nested[0].name, "Cuts");

    let queries = compile(&external(), &e).unwrap();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].to_json()["queryType"], "topN");
}

#[test]
fn test_nested_templates_are_described() {
    let e = r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Count", r("data").count())
        .apply(
            "Colors",
            r("data")
                .split_on("Color", r("color"), "c")
                .apply("Count", r("c").count()),
        );
    let plan = compile_plan(Arc::new(external()), &e).unwrap();
    let described = plan.root.describe();
    assert_eq!(described["query"]["queryType"], "groupBy");
    assert_eq!(described["nested"][0]["name"], "Colors");
    assert_eq!(described["nested"][0]["template"]["op"], "apply");
}
