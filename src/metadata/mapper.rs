//! Native column types to algebra types, per engine.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::druid::extraction::TIME_DIMENSION;
use crate::external::Engine;
use crate::model::{AttributeInfo, PlyType};

/// One column as reported by an engine's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub native_type: String,
}

impl ColumnInfo {
    pub fn new(name: &str, native_type: &str) -> Self {
        Self {
            name: name.into(),
            native_type: native_type.into(),
        }
    }
}

/// What a native type maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mapped {
    Type(PlyType),
    /// A cardinality sketch: only countable, never split on.
    Unique,
}

/// Attributes for the columns an engine understands. Columns with unknown
/// native types are left out.
pub fn map_types(engine: Engine, columns: &[ColumnInfo]) -> Vec<AttributeInfo> {
    columns
        .iter()
        .filter_map(|column| {
            let native = normalize(&column.native_type);
            let mapped = if engine == Engine::Druid && column.name == TIME_DIMENSION {
                Some(Mapped::Type(PlyType::Time))
            } else {
                classify(engine, &native)
            };
            let Some(mapped) = mapped else {
                debug!(
                    engine = %engine,
                    column = %column.name,
                    native_type = %column.native_type,
                    "dropping column with unsupported type"
                );
                return None;
            };
            let attribute = match mapped {
                Mapped::Type(ty) => AttributeInfo::new(&column.name, ty),
                Mapped::Unique => AttributeInfo::new(&column.name, PlyType::String).unique(),
            };
            Some(attribute.with_native_type(&native))
        })
        .collect()
}

/// Lower-case, collapse whitespace and drop numeric precision like `(10,2)`.
fn normalize(native: &str) -> String {
    let lower = native.trim().to_lowercase();
    let lower = lower.split_whitespace().collect::<Vec<_>>().join(" ");
    match lower.find('(') {
        Some(open) if lower.ends_with(')') => {
            let inner = &lower[open + 1..lower.len() - 1];
            let numeric = inner
                .chars()
                .all(|c| c.is_ascii_digit() || c == ',' || c == ' ');
            if numeric {
                lower[..open].trim_end().to_string()
            } else {
                lower
            }
        }
        _ => lower,
    }
}

fn classify(engine: Engine, native: &str) -> Option<Mapped> {
    use PlyType::*;
    let ty = match engine {
        Engine::Presto => match native {
            "tinyint" | "smallint" | "int" | "integer" | "bigint" | "float" | "real" | "double"
            | "decimal" => Number,
            "char" | "varchar" | "string" => String,
            "date" | "timestamp" | "timestamp with time zone" => Time,
            "boolean" => Boolean,
            "array(varchar)" | "array(string)" | "array<string>" => SetString,
            _ => return None,
        },
        Engine::BigQuery => match native {
            "numeric" | "bignumeric" | "int64" | "integer" | "float64" | "float" => Number,
            "string" => String,
            "date" | "datetime" | "timestamp" => Time,
            "bool" | "boolean" => Boolean,
            "array<string>" => SetString,
            _ => return None,
        },
        Engine::Postgres => match native {
            "smallint" | "integer" | "int" | "bigint" | "int2" | "int4" | "int8" | "real"
            | "double precision" | "float4" | "float8" | "numeric" | "decimal" | "serial"
            | "bigserial" => Number,
            "text" | "varchar" | "character varying" | "char" | "character" | "bpchar" => String,
            "date" | "timestamp" | "timestamp without time zone" | "timestamp with time zone"
            | "timestamptz" => Time,
            "boolean" | "bool" => Boolean,
            "text[]" | "character varying[]" | "varchar[]" | "_text" | "_varchar" => SetString,
            _ => return None,
        },
        Engine::MySql => match native {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "float"
            | "double" | "decimal" | "numeric" => Number,
            "char" | "varchar" | "text" | "tinytext" | "mediumtext" | "longtext" => String,
            "date" | "datetime" | "timestamp" => Time,
            "bool" | "boolean" => Boolean,
            _ => return None,
        },
        Engine::Druid => match native {
            "string" => String,
            "long" | "float" | "double" => Number,
            "hyperunique" => return Some(Mapped::Unique),
            _ => return None,
        },
    };
    Some(Mapped::Type(ty))
}
