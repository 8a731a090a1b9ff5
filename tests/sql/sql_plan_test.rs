//! Integration tests for SQL lowering across dialects.
//!
//! Layout is pinned with inline snapshots; statements without engine-specific
//! literal syntax are also round-tripped through sqlparser.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use heron::compile::{compile, compile_plan, plan_level};
use heron::external::{CompileError, Engine, ExternalBuilder, ExternalValue, SortSpec};
use heron::model::{
    lit, lit_num, lit_str, lit_time, lit_time_range, ply, r, AttributeInfo, Duration, Expression,
    Set, SortDirection, TimeRange, Value,
};
use heron::sql::{ClientKey, Reaggregate};
use sqlparser::dialect::{BigQueryDialect, GenericDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

fn builder(engine: Engine) -> ExternalBuilder {
    ExternalValue::builder(engine, "diamonds")
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

fn sql_of(external: &ExternalValue, e: &Expression) -> String {
    let queries = compile(external, e).unwrap();
    assert_eq!(queries.len(), 1);
    queries[0].as_sql().unwrap().to_string()
}

fn validate(sql: &str, engine: Engine) {
    let dialect: Box<dyn sqlparser::dialect::Dialect> = match engine {
        Engine::Postgres => Box::new(PostgreSqlDialect {}),
        Engine::MySql => Box::new(MySqlDialect {}),
        Engine::BigQuery => Box::new(BigQueryDialect {}),
        _ => Box::new(GenericDialect {}),
    };
    if let Err(e) = Parser::parse_sql(&*dialect, sql) {
        panic!("invalid SQL for {}: {}\n{}", engine, e, sql);
    }
}

// ============================================================================
// Layout per mode
// ============================================================================

#[test]
fn test_postgres_split_with_average() {
    let external = builder(Engine::Postgres).filter(week_filter()).build().unwrap();
    let e = r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Count", r("data").count())
        .apply("AvgPrice", r("data").average(r("price")))
        .sort(r("Count"), SortDirection::Descending)
        .limit(5);
    let sql = sql_of(&external, &e);
    insta::assert_snapshot!(sql, @r#"
    SELECT
      "cut" AS "Cut",
      COUNT(*) AS "Count",
      (SUM("price")/COUNT(*)) AS "AvgPrice"
    FROM "diamonds"
    WHERE (TIMESTAMP '2015-03-12 00:00:00.000'<="time" AND "time"<TIMESTAMP '2015-03-19 00:00:00.000')
    GROUP BY 1
    ORDER BY "Count" DESC
    LIMIT 5
    "#);
    validate(&sql, Engine::Postgres);
}

#[test]
fn test_mysql_time_bucket_split() {
    let external = builder(Engine::MySql).filter(week_filter()).build().unwrap();
    let e = r("diamonds")
        .split_on(
            "Day",
            r("time").time_bucket(Duration::parse("P1D").unwrap(), None),
            "data",
        )
        .apply("Count", r("data").count());
    insta::assert_snapshot!(sql_of(&external, &e), @r"
    SELECT
      DATE_FORMAT(`time`, '%Y-%m-%d 00:00:00') AS `Day`,
      COUNT(*) AS `Count`
    FROM `diamonds`
    WHERE (TIMESTAMP('2015-03-12 00:00:00.000')<=`time` AND `time`<TIMESTAMP('2015-03-19 00:00:00.000'))
    GROUP BY 1
    ");
}

#[test]
fn test_bigquery_totals() {
    let external = builder(Engine::BigQuery).build().unwrap();
    let e = ply()
        .apply("Count", r("diamonds").count())
        .apply("Revenue", r("diamonds").sum(r("price")));
    let sql = sql_of(&external, &e);
    insta::assert_snapshot!(sql, @r"
    SELECT
      COUNT(*) AS `Count`,
      SUM(`price`) AS `Revenue`
    FROM `diamonds`
    ");
    validate(&sql, Engine::BigQuery);
}

#[test]
fn test_presto_raw_rows() {
    let external = builder(Engine::Presto).build().unwrap();
    let e = r("diamonds")
        .filter(r("color").is(lit_str("D")))
        .sort(r("price"), SortDirection::Descending)
        .limit(10);
    let sql = sql_of(&external, &e);
    insta::assert_snapshot!(sql, @r#"
    SELECT
      "time",
      "color",
      "cut",
      "price"
    FROM "diamonds"
    WHERE ("color"='D')
    ORDER BY "price" DESC
    LIMIT 10
    "#);
    validate(&sql, Engine::Presto);
}

#[test]
fn test_postgres_value() {
    let external = builder(Engine::Postgres).build().unwrap();
    let sql = sql_of(&external, &r("diamonds").count());
    assert_eq!(sql, "SELECT\n  COUNT(*) AS \"__VALUE__\"\nFROM \"diamonds\"");
    validate(&sql, Engine::Postgres);
}

// ============================================================================
// Aggregates and having
// ============================================================================

#[test]
fn test_filtered_apply_is_conditional_aggregate() {
    let external = builder(Engine::Postgres).build().unwrap();
    let e = r("diamonds")
        .split_on("Color", r("color"), "data")
        .apply("Good", r("data").filter(r("cut").is(lit_str("Good"))).count())
        .apply("GoodPrice", r("data").filter(r("cut").is(lit_str("Good"))).sum(r("price")));
    let sql = sql_of(&external, &e);
    assert!(
        sql.contains("SUM(CASE WHEN (\"cut\"='Good') THEN 1 ELSE 0 END) AS \"Good\""),
        "{}",
        sql
    );
    assert!(
        sql.contains("SUM(CASE WHEN (\"cut\"='Good') THEN \"price\" ELSE 0 END) AS \"GoodPrice\""),
        "{}",
        sql
    );
    validate(&sql, Engine::Postgres);
}

#[test]
fn test_having_is_rendered_over_inlined_aggregates() {
    let external = builder(Engine::MySql).build().unwrap();
    let e = r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Count", r("data").count())
        .filter(r("Count").greater_than(lit_num(100.0)))
        .sort(r("Count"), SortDirection::Descending);
    let sql = sql_of(&external, &e);
    assert!(sql.contains("HAVING (COUNT(*)>100)"), "{}", sql);
    assert!(sql.ends_with("ORDER BY `Count` DESC"), "{}", sql);
    validate(&sql, Engine::MySql);
}

#[test]
fn test_number_bucket_key() {
    let external = builder(Engine::MySql).build().unwrap();
    let e = r("diamonds")
        .split_on("PriceBucket", r("price").number_bucket(10.0, 0.0), "data")
        .apply("Count", r("data").count());
    let sql = sql_of(&external, &e);
    assert!(
        sql.contains("FLOOR(`price` / 10) * 10 AS `PriceBucket`"),
        "{}",
        sql
    );
    validate(&sql, Engine::MySql);
}

#[test]
fn test_custom_aggregate_is_rejected() {
    let external = builder(Engine::Postgres)
        .custom_aggregation("crazy", serde_json::json!({"type": "crazy"}))
        .build()
        .unwrap();
    let e = r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Crazy", r("data").custom_aggregate("crazy"));
    assert!(matches!(
        compile(&external, &e),
        Err(CompileError::UnsupportedAggregate(_))
    ));
}

// ============================================================================
// Client-side splits
// ============================================================================

#[test]
fn test_lookup_key_is_split_on_the_client() {
    let names = BTreeMap::from([
        ("Good".to_string(), "Fine".to_string()),
        ("Very Good".to_string(), "Fine".to_string()),
    ]);
    let external = builder(Engine::Postgres)
        .allow_client_side_splits(true)
        .lookup("cut_names", names.clone())
        .build()
        .unwrap();
    let e = r("diamonds")
        .split_on("Cut", r("cut").lookup("cut_names"), "data")
        .apply("Count", r("data").count())
        .sort(r("Count"), SortDirection::Descending)
        .limit(3);

    let node = plan_level(&external, &e).unwrap();
    let sql = node.query.as_ref().and_then(|q| q.as_sql()).unwrap();
    insta::assert_snapshot!(sql, @r#"
    SELECT
      "cut" AS "Cut",
      COUNT(*) AS "Count"
    FROM "diamonds"
    GROUP BY 1
    "#);
    assert_eq!(
        node.post.client_keys,
        vec![ClientKey {
            name: "Cut".into(),
            lookup: names
        }]
    );
    assert_eq!(node.post.reaggregate["Count"], Reaggregate::Sum);
    assert_eq!(
        node.post.sort,
        Some(SortSpec {
            name: "Count".into(),
            direction: SortDirection::Descending
        })
    );
    assert_eq!(node.post.limit, Some(3));
}

#[test]
fn test_nested_split_binds_parent_key() {
    let external = builder(Engine::Postgres).build().unwrap();
    let e = r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Count", r("data").count())
        .apply(
            "Colors",
            r("data")
                .split_on("Color", r("color"), "c")
                .apply("Count", r("c").count()),
        );

    let plan = compile_plan(Arc::new(external.clone()), &e).unwrap();
    assert_eq!(plan.root.nested.len(), 1);

    let queries = compile(&external, &e).unwrap();
    assert_eq!(queries.len(), 2);
    let child = queries[1].as_sql().unwrap();
    assert!(child.contains("WHERE (\"cut\"='some_cut')"), "{}", child);
    validate(child, Engine::Postgres);
}

// ============================================================================
// Time narrowing
// ============================================================================

fn at(d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015, 3, d, h, 0, 0).unwrap()
}

fn where_of(engine: Engine, filter: Expression) -> String {
    let external = builder(engine).build().unwrap();
    let sql = sql_of(&external, &r("diamonds").filter(filter).count());
    let (_, clause) = sql.split_once("\nWHERE ").expect("a WHERE clause");
    clause.to_string()
}

#[test]
fn test_time_instant_is_a_one_millisecond_range() {
    let instant = || r("time").is(lit_time(at(12, 1)));
    assert_eq!(
        where_of(Engine::Postgres, instant()),
        "(TIMESTAMP '2015-03-12 01:00:00.000'<=\"time\" AND \"time\"<TIMESTAMP '2015-03-12 01:00:00.001')"
    );
    assert_eq!(
        where_of(Engine::Presto, instant()),
        "(from_iso8601_timestamp('2015-03-12T01:00:00.000Z')<=\"time\" \
         AND \"time\"<from_iso8601_timestamp('2015-03-12T01:00:00.001Z'))"
    );
    assert_eq!(
        where_of(Engine::BigQuery, instant()),
        "(TIMESTAMP('2015-03-12T01:00:00.000Z')<=`time` AND `time`<TIMESTAMP('2015-03-12T01:00:00.001Z'))"
    );
    assert_eq!(
        where_of(Engine::MySql, instant()),
        "(TIMESTAMP('2015-03-12 01:00:00.000')<=`time` AND `time`<TIMESTAMP('2015-03-12 01:00:00.001'))"
    );
}

#[test]
fn test_time_conjuncts_are_lifted_ahead_of_other_predicates() {
    let filter = r("color")
        .is(lit_str("D"))
        .and(r("time").is_in(lit_time_range(Some(at(12, 0)), Some(at(19, 0)))))
        .and(r("time").less_than(lit_time(at(14, 0))));
    let clause = where_of(Engine::Postgres, filter);
    assert_eq!(
        clause,
        "((TIMESTAMP '2015-03-12 00:00:00.000'<=\"time\" AND \"time\"<TIMESTAMP '2015-03-14 00:00:00.000') \
         AND (\"color\"='D'))"
    );
    validate(&format!("SELECT 1 FROM t WHERE {}", clause), Engine::Postgres);
}

#[test]
fn test_time_set_becomes_disjunction_of_ranges() {
    let ranges = Set::time_ranges(vec![
        TimeRange::new(at(13, 0), at(14, 0)),
        TimeRange::new(at(15, 0), at(16, 0)),
    ]);
    assert_eq!(
        where_of(Engine::MySql, r("time").is_in(lit(Value::Set(ranges)))),
        "((TIMESTAMP('2015-03-13 00:00:00.000')<=`time` AND `time`<TIMESTAMP('2015-03-14 00:00:00.000')) \
         OR (TIMESTAMP('2015-03-15 00:00:00.000')<=`time` AND `time`<TIMESTAMP('2015-03-16 00:00:00.000')))"
    );
}

#[test]
fn test_disjoint_time_ranges_match_nothing() {
    let filter = r("time")
        .is_in(lit_time_range(Some(at(12, 0)), Some(at(13, 0))))
        .and(r("time").is_in(lit_time_range(Some(at(15, 0)), Some(at(16, 0)))));
    assert_eq!(where_of(Engine::Postgres, filter.clone()), "false");
    assert_eq!(where_of(Engine::MySql, filter), "0");
}
