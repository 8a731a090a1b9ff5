//! Column metadata as known to a backend.

use serde::{Deserialize, Serialize};

use super::types::PlyType;

/// Encodings that need custom extraction logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AttributeSpecial {
    /// Pre-bucketed numbers packed as `"lo<separator>hi"` strings.
    Range {
        separator: String,
        range_size: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        digits_after_decimal: Option<u32>,
    },
    /// A cardinality sketch column (only `countDistinct` is meaningful).
    Unique,
}

/// One column of an external dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub ply_type: PlyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_type: Option<String>,
    #[serde(default)]
    pub unsplitable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special: Option<AttributeSpecial>,
}

impl AttributeInfo {
    pub fn new(name: &str, ply_type: PlyType) -> Self {
        Self {
            name: name.into(),
            ply_type,
            native_type: None,
            unsplitable: false,
            special: None,
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, PlyType::String)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, PlyType::Number)
    }

    pub fn time(name: &str) -> Self {
        Self::new(name, PlyType::Time)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, PlyType::Boolean)
    }

    pub fn set_string(name: &str) -> Self {
        Self::new(name, PlyType::SetString)
    }

    pub fn with_native_type(mut self, native_type: &str) -> Self {
        self.native_type = Some(native_type.into());
        self
    }

    pub fn unsplitable(mut self) -> Self {
        self.unsplitable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.special = Some(AttributeSpecial::Unique);
        self.unsplitable = true;
        self
    }

    pub fn range(mut self, separator: &str, range_size: f64, digits_after_decimal: Option<u32>) -> Self {
        self.special = Some(AttributeSpecial::Range {
            separator: separator.into(),
            range_size,
            digits_after_decimal,
        });
        self
    }

    pub fn is_unique(&self) -> bool {
        matches!(self.special, Some(AttributeSpecial::Unique))
    }
}
