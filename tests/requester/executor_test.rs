//! Integration tests for running query plans against a requester.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use heron::compile::{compile_plan, NativeQuery, QueryPlan};
use heron::external::{Engine, ExternalValue, Row};
use heron::model::{r, AttributeInfo, Expression, SortDirection};
use heron::requester::{
    execute_plan, AbortHandle, Requester, RequesterError, RequesterResult, RowStream,
};
use serde_json::json;

fn row(value: serde_json::Value) -> Row {
    serde_json::from_value(value).unwrap()
}

/// Answers each SQL query with the rows registered for the first matching
/// fragment, recording every statement it was asked to run.
struct Scripted {
    answers: Vec<(&'static str, Vec<Row>)>,
    issued: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(answers: Vec<(&'static str, Vec<Row>)>) -> Self {
        Self {
            answers,
            issued: Mutex::new(Vec::new()),
        }
    }

    fn issued(&self) -> Vec<String> {
        self.issued.lock().unwrap().clone()
    }
}

#[async_trait]
impl Requester for Scripted {
    async fn request(&self, query: NativeQuery) -> RequesterResult<RowStream> {
        let sql = query.as_sql().unwrap_or_default().to_string();
        self.issued.lock().unwrap().push(sql.clone());
        let rows = self
            .answers
            .iter()
            .find(|(fragment, _)| sql.contains(fragment))
            .map(|(_, rows)| rows.clone())
            .ok_or_else(|| RequesterError::Query(format!("no answer for {}", sql)))?;
        let items: Vec<RequesterResult<Row>> = rows.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Fails part way through its stream.
struct Broken;

#[async_trait]
impl Requester for Broken {
    async fn request(&self, _query: NativeQuery) -> RequesterResult<RowStream> {
        let items: Vec<RequesterResult<Row>> = vec![
            Ok(row(json!({"Cut": "Good", "Count": 1}))),
            Err(RequesterError::Query("connection reset".into())),
        ];
        Ok(Box::pin(stream::iter(items)))
    }
}

fn plan(e: &Expression) -> QueryPlan {
    let external = ExternalValue::builder(Engine::Postgres, "diamonds")
        .time_attribute("time")
        .attributes([
            AttributeInfo::time("time"),
            AttributeInfo::string("color"),
            AttributeInfo::string("cut"),
            AttributeInfo::number("price"),
        ])
        .build()
        .unwrap();
    compile_plan(Arc::new(external), e).unwrap()
}

fn nested_expression() -> Expression {
    r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Count", r("data").count())
        .apply(
            "Colors",
            r("data")
                .split_on("Color", r("color"), "c")
                .apply("Count", r("c").count()),
        )
}

#[tokio::test]
async fn test_nested_results_attach_to_parent_rows() {
    let requester = Scripted::new(vec![
        (
            "'Good'",
            vec![row(json!({"Color": "D", "Count": 2})), row(json!({"Color": "E", "Count": 1}))],
        ),
        ("'Ideal'", vec![row(json!({"Color": "F", "Count": 4}))]),
        (
            "GROUP BY",
            vec![row(json!({"Cut": "Good", "Count": 3})), row(json!({"Cut": "Ideal", "Count": 4}))],
        ),
    ]);
    let (_handle, registration) = AbortHandle::new_pair();
    let rows = execute_plan(&plan(&nested_expression()), &requester, registration)
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["Cut"], "Good");
    assert_eq!(
        rows[0]["Colors"],
        json!([{"Color": "D", "Count": 2}, {"Color": "E", "Count": 1}])
    );
    assert_eq!(rows[1]["Colors"], json!([{"Color": "F", "Count": 4}]));

    let issued = requester.issued();
    assert_eq!(issued.len(), 3);
    assert!(!issued[0].contains("WHERE"), "{}", issued[0]);
    assert!(issued[1].contains("WHERE (\"cut\"='Good')"), "{}", issued[1]);
    assert!(issued[2].contains("WHERE (\"cut\"='Ideal')"), "{}", issued[2]);
}

#[tokio::test]
async fn test_client_sort_and_limit_apply_to_results() {
    let e = r("diamonds")
        .split_on("Cut", r("cut"), "data")
        .apply("Count", r("data").count())
        .sort(r("Count"), SortDirection::Descending)
        .limit(2);
    let requester = Scripted::new(vec![(
        "GROUP BY",
        vec![
            row(json!({"Cut": "Fair", "Count": 5})),
            row(json!({"Cut": "Good", "Count": 3})),
        ],
    )]);
    let (_handle, registration) = AbortHandle::new_pair();
    let rows = execute_plan(&plan(&e), &requester, registration)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["Cut"], "Fair");
}

#[tokio::test]
async fn test_requester_errors_propagate() {
    let requester = Scripted::new(Vec::new());
    let (_handle, registration) = AbortHandle::new_pair();
    let result = execute_plan(&plan(&nested_expression()), &requester, registration).await;
    assert!(matches!(result, Err(RequesterError::Query(_))));
}

#[tokio::test]
async fn test_stream_errors_discard_partial_rows() {
    let (_handle, registration) = AbortHandle::new_pair();
    let result = execute_plan(&plan(&nested_expression()), &Broken, registration).await;
    match result {
        Err(RequesterError::Query(message)) => assert_eq!(message, "connection reset"),
        other => panic!("expected a query error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_abort_cancels_the_chain() {
    let requester = Scripted::new(Vec::new());
    let (handle, registration) = AbortHandle::new_pair();
    handle.abort();
    let result = execute_plan(&plan(&nested_expression()), &requester, registration).await;
    assert!(matches!(result, Err(RequesterError::Cancelled)));
    assert!(requester.issued().is_empty());
}
