//! Integration tests for catalog type mapping.

use heron::compile::compile;
use heron::external::{Engine, ExternalValue};
use heron::metadata::{map_types, ColumnInfo};
use heron::model::{r, PlyType};

fn types_of(engine: Engine, columns: &[(&str, &str)]) -> Vec<(String, PlyType)> {
    let columns: Vec<ColumnInfo> = columns
        .iter()
        .map(|(name, ty)| ColumnInfo::new(name, ty))
        .collect();
    map_types(engine, &columns)
        .into_iter()
        .map(|a| (a.name, a.ply_type))
        .collect()
}

#[test]
fn test_presto_columns() {
    let attrs = map_types(
        Engine::Presto,
        &[
            ColumnInfo::new("price", "DECIMAL(10,2)"),
            ColumnInfo::new("time", "timestamp with time zone"),
            ColumnInfo::new("tags", "array(varchar)"),
            ColumnInfo::new("geo", "map(varchar,varchar)"),
        ],
    );
    assert_eq!(attrs.len(), 3);
    assert_eq!(attrs[0].ply_type, PlyType::Number);
    assert_eq!(attrs[0].native_type.as_deref(), Some("decimal"));
    assert_eq!(attrs[1].ply_type, PlyType::Time);
    assert_eq!(attrs[2].ply_type, PlyType::SetString);
}

#[test]
fn test_postgres_columns() {
    assert_eq!(
        types_of(
            Engine::Postgres,
            &[
                ("page", "character varying(255)"),
                ("added", "double precision"),
                ("time", "timestamptz"),
                ("tags", "text[]"),
                ("payload", "jsonb"),
                ("robot", "boolean"),
            ],
        ),
        vec![
            ("page".to_string(), PlyType::String),
            ("added".to_string(), PlyType::Number),
            ("time".to_string(), PlyType::Time),
            ("tags".to_string(), PlyType::SetString),
            ("robot".to_string(), PlyType::Boolean),
        ]
    );
}

#[test]
fn test_mysql_columns() {
    assert_eq!(
        types_of(
            Engine::MySql,
            &[
                ("time", "DATETIME"),
                ("count", "tinyint"),
                ("page", "VARCHAR(64)"),
                ("blob", "longblob"),
            ],
        ),
        vec![
            ("time".to_string(), PlyType::Time),
            ("count".to_string(), PlyType::Number),
            ("page".to_string(), PlyType::String),
        ]
    );
}

#[test]
fn test_druid_sketch_is_unique_and_unsplitable() {
    let attrs = map_types(
        Engine::Druid,
        &[
            ColumnInfo::new("__time", "LONG"),
            ColumnInfo::new("user_unique", "hyperUnique"),
        ],
    );
    assert_eq!(attrs[0].ply_type, PlyType::Time);
    assert_eq!(attrs[1].ply_type, PlyType::String);
    assert!(attrs[1].is_unique());
    assert!(attrs[1].unsplitable);
}

#[test]
fn test_column_listing_deserializes() {
    let columns: Vec<ColumnInfo> = serde_json::from_str(
        r#"[{"name": "time", "type": "TIMESTAMP"}, {"name": "page", "type": "STRING"}]"#,
    )
    .unwrap();
    assert_eq!(columns[0], ColumnInfo::new("time", "TIMESTAMP"));
    assert_eq!(
        types_of(Engine::BigQuery, &[("time", "TIMESTAMP"), ("page", "STRING")]),
        vec![
            ("time".to_string(), PlyType::Time),
            ("page".to_string(), PlyType::String),
        ]
    );
}

#[test]
fn test_mapped_attributes_feed_an_external() {
    let attributes = map_types(
        Engine::Postgres,
        &[
            ColumnInfo::new("time", "timestamp"),
            ColumnInfo::new("page", "text"),
        ],
    );
    let external = ExternalValue::builder(Engine::Postgres, "wiki")
        .time_attribute("time")
        .attributes(attributes)
        .build()
        .unwrap();
    let queries = compile(&external, &r("wiki").count()).unwrap();
    assert!(queries[0].as_sql().unwrap().contains("FROM \"wiki\""));
}
