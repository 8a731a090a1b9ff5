//! Integration tests for the expression algebra.
//!
//! These tests cover the JSON form expressions arrive in, the structural
//! helpers the compilers rely on, and type inference.

use heron::model::{
    and_all, lit_bool, lit_num, lit_set_str, lit_str, r, simplify_and, Duration, Expression,
    ExpressionError, PlyType, SortDirection, Timezone,
};
use serde_json::json;

fn resolve(name: &str) -> Option<PlyType> {
    match name {
        "diamonds" | "data" => Some(PlyType::Dataset),
        "time" => Some(PlyType::Time),
        "color" | "cut" => Some(PlyType::String),
        "price" | "carat" => Some(PlyType::Number),
        "isNice" => Some(PlyType::Boolean),
        _ => None,
    }
}

// ============================================================================
// JSON form
// ============================================================================

#[test]
fn test_query_json_matches_builder() {
    let source = r#"{
        "op": "limit",
        "value": 5,
        "operand": {
            "op": "sort",
            "direction": "descending",
            "expression": {"op": "ref", "name": "Count"},
            "operand": {
                "op": "apply",
                "name": "Count",
                "expression": {"op": "count", "operand": {"op": "ref", "name": "data"}},
                "operand": {
                    "op": "split",
                    "dataName": "data",
                    "keys": {"Cut": {"op": "ref", "name": "cut"}},
                    "operand": {"op": "ref", "name": "diamonds"}
                }
            }
        }
    }"#;
    let parsed: Expression = serde_json::from_str(source).unwrap();

    let built = r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Count", r("data").count())
        .sort(r("Count"), SortDirection::Descending)
        .limit(5);
    assert_eq!(parsed, built);
}

#[test]
fn test_literal_and_time_fields_json() {
    let e = r("color").is(lit_str("D"));
    assert_eq!(
        serde_json::to_value(&e).unwrap(),
        json!({
            "op": "is",
            "operand": {"op": "ref", "name": "color"},
            "expression": {"op": "literal", "value": {"type": "STRING", "value": "D"}}
        })
    );

    let bucket: Expression = serde_json::from_value(json!({
        "op": "timeBucket",
        "operand": {"op": "ref", "name": "time"},
        "duration": "P1D",
        "timezone": "America/Los_Angeles"
    }))
    .unwrap();
    assert_eq!(
        bucket,
        r("time").time_bucket(
            Duration::parse("P1D").unwrap(),
            Some(Timezone::parse("America/Los_Angeles").unwrap())
        )
    );
}

#[test]
fn test_bad_duration_in_json_is_rejected() {
    let result: Result<Expression, _> = serde_json::from_value(json!({
        "op": "timeBucket",
        "operand": {"op": "ref", "name": "time"},
        "duration": "P1X"
    }));
    assert!(result.is_err());
}

// ============================================================================
// Structure
// ============================================================================

#[test]
fn test_operators_build_arithmetic() {
    let e = r("data").sum(r("price")) / r("data").count();
    assert_eq!(e.op_name(), "divide");
    assert!(e.contains_aggregate());
    assert!(!e.is_aggregate());

    let negated = !r("isNice");
    assert_eq!(negated.op_name(), "not");
}

#[test]
fn test_references_and_substitute() {
    let e = (r("Price") - r("Cost")) * lit_num(2.0);
    let names: Vec<String> = e.references().into_iter().collect();
    assert_eq!(names, vec!["Cost".to_string(), "Price".to_string()]);

    let replaced = e.substitute("Cost", &r("data").sum(r("cost")));
    assert!(replaced.contains_aggregate());
    assert!(!replaced.references().contains("Cost"));
}

#[test]
fn test_and_all_folds_literals() {
    assert!(and_all(vec![]).is_literal_true());
    assert!(and_all(vec![lit_bool(true), lit_bool(true)]).is_literal_true());
    assert!(and_all(vec![r("isNice"), lit_bool(false)]).is_literal_false());
    assert_eq!(and_all(vec![lit_bool(true), r("isNice")]), r("isNice"));
}

#[test]
fn test_simplify_drops_duplicates_and_narrows() {
    let e = r("color")
        .is_in(lit_set_str(["D", "E"]))
        .and(r("cut").is(lit_str("Good")))
        .and(r("cut").is(lit_str("Good")))
        .and(r("color").is(lit_str("D")));
    assert_eq!(
        simplify_and(e),
        r("color").is(lit_str("D")).and(r("cut").is(lit_str("Good")))
    );
}

// ============================================================================
// Type inference
// ============================================================================

#[test]
fn test_infer_types() {
    assert_eq!(r("data").count().infer_type(&resolve), Ok(PlyType::Number));
    assert_eq!(r("data").max(r("time")).infer_type(&resolve), Ok(PlyType::Time));
    assert_eq!(
        r("color").concat(lit_str("!")).infer_type(&resolve),
        Ok(PlyType::String)
    );
    assert_eq!(
        r("price").greater_than(lit_num(10.0)).infer_type(&resolve),
        Ok(PlyType::Boolean)
    );
    assert_eq!(
        r("diamonds")
            .filter(r("isNice"))
            .infer_type(&resolve),
        Ok(PlyType::Dataset)
    );
}

#[test]
fn test_infer_type_errors() {
    assert!(matches!(
        r("data").sum(r("color")).infer_type(&resolve),
        Err(ExpressionError::TypeMismatch { op: "sum", .. })
    ));
    assert_eq!(
        r("nope").infer_type(&resolve),
        Err(ExpressionError::UnknownReference("nope".into()))
    );
}
