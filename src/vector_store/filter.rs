//! Metadata filter compilation.
//!
//! A filter is either a trusted raw SQL fragment or a set of key/value pairs
//! that the document's metadata must contain. The store's default filters are
//! OR-ed together and AND-ed with the per-call filter. The compiled predicate
//! is spliced verbatim into queries, lookups, deletes and partial index
//! definitions, so all four see exactly the same text.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Unsupported filter shape: expected a string or an object, got {0}")]
    UnsupportedShape(&'static str),

    #[error("{0} requires a non-empty filter")]
    Empty(&'static str),

    #[error("Invalid index name '{0}': must be a plain SQL identifier")]
    InvalidIndexName(String),
}

/// A single metadata predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataFilter {
    /// SQL boolean expression used verbatim. Must come from trusted code,
    /// never from end-user input.
    Raw(String),

    /// The metadata must contain every listed key with an equal value
    /// (`metadata @> '{...}'`). Values may be nested objects or arrays.
    Equals(Map<String, Value>),
}

impl MetadataFilter {
    /// Shorthand for a single-key containment filter.
    pub fn equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = Map::new();
        map.insert(key.into(), value.into());
        MetadataFilter::Equals(map)
    }

    pub fn raw(fragment: impl Into<String>) -> Self {
        MetadataFilter::Raw(fragment.into())
    }

    /// Compile to a boolean SQL expression, or `None` when the filter
    /// constrains nothing (blank fragment, empty object).
    pub fn compile(&self) -> Option<String> {
        match self {
            MetadataFilter::Raw(fragment) => {
                let fragment = fragment.trim();
                (!fragment.is_empty()).then(|| fragment.to_string())
            }
            MetadataFilter::Equals(pairs) if pairs.is_empty() => None,
            MetadataFilter::Equals(pairs) => {
                let json = Value::Object(pairs.clone()).to_string();
                Some(format!("metadata @> {}::jsonb", quote_literal(&json)))
            }
        }
    }
}

impl TryFrom<Value> for MetadataFilter {
    type Error = FilterError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(fragment) => Ok(MetadataFilter::Raw(fragment)),
            Value::Object(pairs) => Ok(MetadataFilter::Equals(pairs)),
            Value::Null => Err(FilterError::UnsupportedShape("null")),
            Value::Bool(_) => Err(FilterError::UnsupportedShape("a boolean")),
            Value::Number(_) => Err(FilterError::UnsupportedShape("a number")),
            Value::Array(_) => Err(FilterError::UnsupportedShape("an array")),
        }
    }
}

/// Combine an optional per-call filter with the store's default filters.
///
/// Returns an empty string when neither constrains anything.
pub fn compile_filter(per_call: Option<&MetadataFilter>, defaults: &[MetadataFilter]) -> String {
    let per_call = per_call.and_then(MetadataFilter::compile);

    let mut alternatives: Vec<String> = defaults
        .iter()
        .filter_map(MetadataFilter::compile)
        .map(|predicate| format!("({predicate})"))
        .collect();
    let defaults = match alternatives.len() {
        0 => None,
        1 => alternatives.pop(),
        _ => Some(format!("({})", alternatives.join(" OR "))),
    };

    match (per_call, defaults) {
        (Some(per_call), Some(defaults)) => format!("({per_call}) AND {defaults}"),
        (Some(per_call), None) => format!("({per_call})"),
        (None, Some(defaults)) => defaults,
        (None, None) => String::new(),
    }
}

/// ` WHERE <predicate>`, or nothing for an empty predicate.
pub(crate) fn where_clause(predicate: &str) -> String {
    if predicate.is_empty() {
        String::new()
    } else {
        format!(" WHERE {predicate}")
    }
}

/// ` AND <predicate>`, or nothing for an empty predicate.
pub(crate) fn and_clause(predicate: &str) -> String {
    if predicate.is_empty() {
        String::new()
    } else {
        format!(" AND {predicate}")
    }
}

/// Quote `text` as a standard-conforming SQL string literal.
fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
