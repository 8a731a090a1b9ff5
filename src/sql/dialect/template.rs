//! Operand templates and the per-dialect lookup tables built from them.
//!
//! A template is a SQL fragment with one or more `$$` operand slots, e.g.
//! `cast($$ as varchar)`. Templates are validated when a table is built, so a
//! malformed entry is rejected at construction instead of at first use.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::model::{Duration, PlyType, TimePart};

pub const OPERAND_SLOT: &str = "$$";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Template has no `$$` operand slot: {0}")]
    MissingOperand(String),

    #[error("Template has a stray `$` at byte {position}: {template}")]
    StrayDollar { template: String, position: usize },

    #[error("Template has unbalanced parentheses: {0}")]
    Unbalanced(String),

    #[error("Bucketing table key is not an ISO-8601 duration: {0}")]
    InvalidDuration(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Operand,
}

/// A validated SQL fragment with operand slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(src: &str) -> Result<Template, TemplateError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut depth: i32 = 0;
        let mut in_quote = false;
        let bytes = src.as_bytes();
        let mut i = 0;

        while i < bytes.len() {
            let c = bytes[i] as char;
            match c {
                '$' if bytes.get(i + 1) == Some(&b'$') => {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Operand);
                    i += 2;
                    continue;
                }
                '$' => {
                    return Err(TemplateError::StrayDollar {
                        template: src.to_string(),
                        position: i,
                    })
                }
                '\'' => in_quote = !in_quote,
                '(' if !in_quote => depth += 1,
                ')' if !in_quote => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(TemplateError::Unbalanced(src.to_string()));
                    }
                }
                _ => {}
            }
            // Multi-byte characters are copied through unchanged.
            let ch_len = src[i..].chars().next().map(char::len_utf8).unwrap_or(1);
            text.push_str(&src[i..i + ch_len]);
            i += ch_len;
        }

        if depth != 0 || in_quote {
            return Err(TemplateError::Unbalanced(src.to_string()));
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        if !segments.contains(&Segment::Operand) {
            return Err(TemplateError::MissingOperand(src.to_string()));
        }
        Ok(Template { segments })
    }

    /// Substitute `operand` into every slot.
    pub fn render(&self, operand: &str) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Text(t) => t.as_str(),
                Segment::Operand => operand,
            })
            .collect()
    }

    pub fn slots(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Operand))
            .count()
    }
}

impl FromStr for Template {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Template::parse(s)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(OPERAND_SLOT))
    }
}

// ============================================================================
// Tables
// ============================================================================

/// Static lookup data of one dialect instance.
#[derive(Debug, Clone, Default)]
pub struct DialectTables {
    /// Keyed `[to][from]`.
    casts: HashMap<PlyType, HashMap<PlyType, Template>>,
    /// Keyed by canonical ISO-8601 duration.
    buckets: BTreeMap<String, String>,
    time_parts: HashMap<TimePart, Template>,
}

impl DialectTables {
    pub fn builder() -> DialectTablesBuilder {
        DialectTablesBuilder::default()
    }

    pub fn cast(&self, from: PlyType, to: PlyType) -> Option<&Template> {
        self.casts.get(&to).and_then(|m| m.get(&from))
    }

    pub fn bucket(&self, duration: &Duration) -> Option<&str> {
        self.buckets.get(&duration.to_string()).map(String::as_str)
    }

    pub fn time_part(&self, part: TimePart) -> Option<&Template> {
        self.time_parts.get(&part)
    }

    /// Every supported `(from, to)` cast pair.
    pub fn cast_pairs(&self) -> Vec<(PlyType, PlyType)> {
        let mut pairs: Vec<_> = self
            .casts
            .iter()
            .flat_map(|(to, froms)| froms.keys().map(move |from| (*from, *to)))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn bucket_durations(&self) -> Vec<Duration> {
        self.buckets
            .keys()
            .filter_map(|k| Duration::parse(k).ok())
            .collect()
    }

    pub fn time_parts(&self) -> Vec<TimePart> {
        let mut parts: Vec<_> = self.time_parts.keys().copied().collect();
        parts.sort();
        parts
    }
}

/// Collects table entries, keeping the first validation error.
#[derive(Debug, Default)]
#[must_use = "builders have no effect until built"]
pub struct DialectTablesBuilder {
    tables: DialectTables,
    error: Option<TemplateError>,
}

impl DialectTablesBuilder {
    pub fn cast(mut self, to: PlyType, from: PlyType, template: &str) -> Self {
        if let Some(t) = self.check(Template::parse(template)) {
            self.tables.casts.entry(to).or_default().insert(from, t);
        }
        self
    }

    pub fn bucket(mut self, duration: &str, spec: &str) -> Self {
        match Duration::parse(duration) {
            Ok(d) => {
                self.tables.buckets.insert(d.to_string(), spec.to_string());
            }
            Err(_) => {
                self.error
                    .get_or_insert(TemplateError::InvalidDuration(duration.to_string()));
            }
        }
        self
    }

    pub fn time_part(mut self, part: TimePart, template: &str) -> Self {
        if let Some(t) = self.check(Template::parse(template)) {
            self.tables.time_parts.insert(part, t);
        }
        self
    }

    pub fn build(self) -> Result<DialectTables, TemplateError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.tables),
        }
    }

    fn check(&mut self, parsed: Result<Template, TemplateError>) -> Option<Template> {
        match parsed {
            Ok(t) => Some(t),
            Err(e) => {
                self.error.get_or_insert(e);
                None
            }
        }
    }
}
