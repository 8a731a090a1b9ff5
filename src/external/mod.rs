//! Bindings between the expression algebra and one physical data source.
//!
//! An `ExternalValue` names the backend engine, the source table or
//! datasource, the declared attributes and an optional base filter that is
//! ANDed into every query compiled against it. It is built once and only read
//! afterwards:
//!
//! ```ignore
//! use heron::external::{Engine, ExternalValue};
//! use heron::model::{AttributeInfo, r, lit_time_range};
//!
//! let external = ExternalValue::builder(Engine::Druid, "diamonds")
//!     .time_attribute("time")
//!     .attribute(AttributeInfo::time("time"))
//!     .attribute(AttributeInfo::string("color"))
//!     .filter(r("time").is_in(lit_time_range(Some(start), Some(end))))
//!     .build()?;
//! ```

pub mod aggregate;
pub mod binding;
mod error;
pub mod fold;
pub mod time_filter;

pub use error::{CompileError, CompileResult};
pub use fold::{fold, FoldedQuery, Having, NamedExpression, NestedApply, QueryMode, SortSpec, SplitSpec};

/// One result datum keyed by output name.
pub type Row = serde_json::Map<String, serde_json::Value>;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{lit_bool, AttributeInfo, Expression, PlyType};
use crate::sql::dialect::{Dialect, SqlDialect};

/// Backend engines a dataset can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Druid,
    #[serde(alias = "athena", alias = "trino")]
    Presto,
    BigQuery,
    Postgres,
    MySql,
}

impl Engine {
    /// The built-in SQL dialect, `None` for the JSON-speaking engine.
    pub fn sql_dialect(&self) -> Option<Dialect> {
        match self {
            Engine::Druid => None,
            Engine::Presto => Some(Dialect::Presto),
            Engine::BigQuery => Some(Dialect::BigQuery),
            Engine::Postgres => Some(Dialect::Postgres),
            Engine::MySql => Some(Dialect::MySql),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Druid => "druid",
            Engine::Presto => "presto",
            Engine::BigQuery => "bigquery",
            Engine::Postgres => "postgres",
            Engine::MySql => "mysql",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "druid" => Ok(Engine::Druid),
            "presto" | "athena" | "trino" => Ok(Engine::Presto),
            "bigquery" => Ok(Engine::BigQuery),
            "postgres" | "postgresql" => Ok(Engine::Postgres),
            "mysql" => Ok(Engine::MySql),
            other => Err(format!("unknown engine: {}", other)),
        }
    }
}

// ============================================================================
// ExternalValue
// ============================================================================

/// Immutable configuration of one dataset binding.
#[derive(Debug, Clone)]
pub struct ExternalValue {
    engine: Engine,
    source: String,
    time_attribute: Option<String>,
    attributes: Vec<AttributeInfo>,
    filter: Expression,
    context: serde_json::Map<String, serde_json::Value>,
    allow_select_queries: bool,
    allow_client_side_splits: bool,
    custom_aggregations: BTreeMap<String, serde_json::Value>,
    lookups: BTreeMap<String, BTreeMap<String, String>>,
    dialect: Option<Arc<dyn SqlDialect>>,
}

impl ExternalValue {
    pub fn builder(engine: Engine, source: &str) -> ExternalBuilder {
        ExternalBuilder::new(engine, source)
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn time_attribute(&self) -> Option<&str> {
        self.time_attribute.as_deref()
    }

    pub fn is_time_attribute(&self, name: &str) -> bool {
        self.time_attribute.as_deref() == Some(name)
    }

    pub fn attributes(&self) -> &[AttributeInfo] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Base predicate; literal `true` when none was configured.
    pub fn filter(&self) -> &Expression {
        &self.filter
    }

    pub fn context(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.context
    }

    pub fn allow_select_queries(&self) -> bool {
        self.allow_select_queries
    }

    pub fn allow_client_side_splits(&self) -> bool {
        self.allow_client_side_splits
    }

    /// Raw engine aggregator JSON registered under `name`.
    pub fn custom_aggregation(&self, name: &str) -> Option<&serde_json::Value> {
        self.custom_aggregations.get(name)
    }

    /// Static lookup table registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.lookups.get(name)
    }

    /// The dialect SQL is rendered with: an explicit override, else the engine default.
    pub fn sql_dialect(&self) -> Option<&dyn SqlDialect> {
        match &self.dialect {
            Some(d) => Some(d.as_ref()),
            None => self.engine.sql_dialect().map(|d| d.dialect()),
        }
    }

    /// Type of an attribute; `None` for unknown names.
    pub fn attribute_type(&self, name: &str) -> Option<PlyType> {
        self.attribute(name).map(|a| a.ply_type)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for `ExternalValue`; `build` validates the attribute list.
#[derive(Debug, Clone)]
#[must_use = "builders have no effect until build() is called"]
pub struct ExternalBuilder {
    value: ExternalValue,
}

impl ExternalBuilder {
    fn new(engine: Engine, source: &str) -> Self {
        Self {
            value: ExternalValue {
                engine,
                source: source.into(),
                time_attribute: None,
                attributes: Vec::new(),
                filter: lit_bool(true),
                context: serde_json::Map::new(),
                allow_select_queries: false,
                allow_client_side_splits: false,
                custom_aggregations: BTreeMap::new(),
                lookups: BTreeMap::new(),
                dialect: None,
            },
        }
    }

    pub fn time_attribute(mut self, name: &str) -> Self {
        self.value.time_attribute = Some(name.into());
        self
    }

    pub fn attribute(mut self, attribute: AttributeInfo) -> Self {
        self.value.attributes.push(attribute);
        self
    }

    pub fn attributes(mut self, attributes: impl IntoIterator<Item = AttributeInfo>) -> Self {
        self.value.attributes.extend(attributes);
        self
    }

    pub fn filter(mut self, filter: Expression) -> Self {
        self.value.filter = filter;
        self
    }

    pub fn context(mut self, key: &str, value: serde_json::Value) -> Self {
        self.value.context.insert(key.into(), value);
        self
    }

    pub fn allow_select_queries(mut self, allow: bool) -> Self {
        self.value.allow_select_queries = allow;
        self
    }

    pub fn allow_client_side_splits(mut self, allow: bool) -> Self {
        self.value.allow_client_side_splits = allow;
        self
    }

    pub fn custom_aggregation(mut self, name: &str, aggregator: serde_json::Value) -> Self {
        self.value.custom_aggregations.insert(name.into(), aggregator);
        self
    }

    pub fn lookup(mut self, name: &str, table: BTreeMap<String, String>) -> Self {
        self.value.lookups.insert(name.into(), table);
        self
    }

    /// Render SQL with `dialect` instead of the engine's built-in one.
    pub fn dialect(mut self, dialect: Arc<dyn SqlDialect>) -> Self {
        self.value.dialect = Some(dialect);
        self
    }

    pub fn build(self) -> CompileResult<ExternalValue> {
        let value = self.value;

        let mut seen = HashSet::new();
        for attr in &value.attributes {
            if !seen.insert(attr.name.as_str()) {
                return Err(CompileError::DuplicateAttribute(attr.name.clone()));
            }
        }

        if let Some(time) = &value.time_attribute {
            match value.attribute(time) {
                Some(attr) if attr.ply_type != PlyType::Time => {
                    return Err(CompileError::InvalidConfig(format!(
                        "time attribute '{}' has type {}",
                        time, attr.ply_type
                    )));
                }
                Some(_) => {}
                None if value.attributes.is_empty() => {}
                None => return Err(CompileError::UnknownAttribute(time.clone())),
            }
        }

        if value.engine == Engine::Druid && value.dialect.is_some() {
            return Err(CompileError::InvalidConfig(
                "a SQL dialect cannot be attached to a druid dataset".into(),
            ));
        }

        Ok(value)
    }
}
