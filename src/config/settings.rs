//! TOML-based dataset configuration.
//!
//! Supports a config file (heron.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [datasets.wiki]
//! engine = "druid"
//! source = "wikipedia"
//! time_attribute = "time"
//! allow_client_side_splits = true
//! attributes = [
//!   { name = "time", type = "TIME" },
//!   { name = "page", type = "STRING" },
//!   { name = "added", type = "NUMBER" },
//! ]
//! filter = '{"op": "is", "operand": {"op": "ref", "name": "language"}, "expression": {"op": "literal", "value": {"type": "STRING", "value": "en"}}}'
//!
//! [datasets.wiki.context]
//! timeout = 10000
//!
//! [datasets.wiki.custom_aggregations]
//! crazy = { type = "javascript", fieldNames = ["added"] }
//!
//! [datasets.wiki.lookups.country_names]
//! us = "United States"
//!
//! [datasets.diamonds]
//! engine = "postgres"
//! source = "${DIAMONDS_TABLE}"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::external::{CompileError, Engine, ExternalValue};
use crate::model::{AttributeInfo, Expression};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Unterminated variable reference in: {0}")]
    UnterminatedVar(String),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Unsupported engine: {0}")]
    UnsupportedEngine(String),

    #[error("Invalid filter expression: {0}")]
    InvalidFilter(#[from] serde_json::Error),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(#[from] CompileError),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Named dataset bindings.
    pub datasets: BTreeMap<String, DatasetSettings>,
}

/// One `[datasets.<name>]` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetSettings {
    /// Backend engine (druid, presto, bigquery, postgres, mysql).
    pub engine: String,

    /// Datasource or table name (supports ${ENV_VAR} expansion).
    pub source: String,

    #[serde(default)]
    pub time_attribute: Option<String>,

    #[serde(default)]
    pub attributes: Vec<AttributeInfo>,

    /// Base filter as a JSON-serialized expression.
    #[serde(default)]
    pub filter: Option<String>,

    /// Engine context passed through with every query.
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub allow_select_queries: bool,

    #[serde(default)]
    pub allow_client_side_splits: bool,

    /// Druid aggregator JSON keyed by custom aggregate name.
    #[serde(default)]
    pub custom_aggregations: BTreeMap<String, serde_json::Value>,

    /// Static key to value tables keyed by lookup function name.
    #[serde(default)]
    pub lookups: BTreeMap<String, BTreeMap<String, String>>,
}

impl DatasetSettings {
    /// Get the engine type.
    pub fn engine_type(&self) -> Result<Engine, SettingsError> {
        self.engine
            .parse()
            .map_err(|_| SettingsError::UnsupportedEngine(self.engine.clone()))
    }

    /// Get the source with environment variables expanded.
    pub fn resolved_source(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.source)
    }

    /// Parse the base filter, if one is configured.
    pub fn base_filter(&self) -> Result<Option<Expression>, SettingsError> {
        match &self.filter {
            Some(raw) => Ok(Some(serde_json::from_str(&expand_env_vars(raw)?)?)),
            None => Ok(None),
        }
    }

    /// Build the external binding this table describes.
    pub fn to_external(&self) -> Result<ExternalValue, SettingsError> {
        let source = self.resolved_source()?;
        let mut builder = ExternalValue::builder(self.engine_type()?, &source)
            .attributes(self.attributes.iter().cloned())
            .allow_select_queries(self.allow_select_queries)
            .allow_client_side_splits(self.allow_client_side_splits);

        if let Some(time) = &self.time_attribute {
            builder = builder.time_attribute(time);
        }
        if let Some(filter) = self.base_filter()? {
            builder = builder.filter(filter);
        }
        for (key, value) in &self.context {
            builder = builder.context(key, expand_json(value)?);
        }
        for (name, aggregator) in &self.custom_aggregations {
            builder = builder.custom_aggregation(name, aggregator.clone());
        }
        for (name, table) in &self.lookups {
            builder = builder.lookup(name, table.clone());
        }

        debug!(engine = %self.engine, source = %source, "built dataset binding");
        Ok(builder.build()?)
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `HERON_CONFIG`
    /// 2. `./heron.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("HERON_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("heron.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        Ok(Settings::default())
    }

    /// Get a dataset by name.
    pub fn get_dataset(&self, name: &str) -> Result<&DatasetSettings, SettingsError> {
        self.datasets
            .get(name)
            .ok_or_else(|| SettingsError::DatasetNotFound(name.to_string()))
    }

    /// The dataset to use when none is named: `default`, else the only one.
    pub fn default_dataset(&self) -> Option<(&str, &DatasetSettings)> {
        if let Some(dataset) = self.datasets.get("default") {
            return Some(("default", dataset));
        }
        if self.datasets.len() == 1 {
            return self.datasets.iter().next().map(|(k, v)| (k.as_str(), v));
        }
        None
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let var_name = if chars.next_if_eq(&'{').is_some() {
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(ch) => name.push(ch),
                    None => return Err(SettingsError::UnterminatedVar(s.to_string())),
                }
            }
            name
        } else {
            let mut name = String::new();
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                name.push(ch);
            }
            if name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
            name
        };

        let value = env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name))?;
        result.push_str(&value);
    }

    Ok(result)
}

fn expand_json(value: &serde_json::Value) -> Result<serde_json::Value, SettingsError> {
    Ok(match value {
        serde_json::Value::String(s) => serde_json::Value::String(expand_env_vars(s)?),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.iter().map(expand_json).collect::<Result<_, _>>()?,
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), expand_json(v)?)))
                .collect::<Result<_, SettingsError>>()?,
        ),
        other => other.clone(),
    })
}
