use serde::{Deserialize, Serialize};

use super::{ConfigError, is_reserved_keyword, is_valid_identifier};
use crate::vector_store::MetadataFilter;

/// Store configuration: everything fixed for the lifetime of a store instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Backing table name.
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Embedding dimensionality. Every stored and queried vector must have
    /// exactly this many components.
    pub dimensions: usize,

    /// Distance metric used for ordering and for index operator classes.
    #[serde(default)]
    pub distance: DistanceMetric,

    /// Filters applied to every query, lookup, delete and partial index.
    /// They are OR-ed together and AND-ed with the per-call filter.
    #[serde(default)]
    pub filters: Vec<MetadataFilter>,

    /// HNSW graph degree (`m`).
    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: u32,

    /// HNSW build-time candidate list size (`ef_construction`).
    #[serde(default = "default_hnsw_ef_construction")]
    pub hnsw_ef_construction: u32,

    /// HNSW query-time candidate list size (`hnsw.ef_search`).
    #[serde(default = "default_hnsw_ef_search")]
    pub hnsw_ef_search: u32,

    /// Rows per ingestion transaction.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Emit diagnostic events (generated SQL, compiled predicates).
    #[serde(default)]
    pub verbose: bool,
}

impl StoreConfig {
    /// Config with defaults for everything but the dimensionality.
    pub fn new(dimensions: usize) -> Self {
        Self {
            table_name: default_table_name(),
            dimensions,
            distance: DistanceMetric::default(),
            filters: Vec::new(),
            hnsw_m: default_hnsw_m(),
            hnsw_ef_construction: default_hnsw_ef_construction(),
            hnsw_ef_search: default_hnsw_ef_search(),
            chunk_size: default_chunk_size(),
            verbose: false,
        }
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn with_distance(mut self, distance: DistanceMetric) -> Self {
        self.distance = distance;
        self
    }

    pub fn with_filters(mut self, filters: Vec<MetadataFilter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_identifier(&self.table_name) {
            return Err(ConfigError::Validation(format!(
                "store.table_name '{}' is not a plain SQL identifier",
                self.table_name
            )));
        }
        if is_reserved_keyword(&self.table_name) {
            return Err(ConfigError::Validation(format!(
                "store.table_name '{}' is a reserved SQL keyword",
                self.table_name
            )));
        }
        if self.dimensions == 0 {
            return Err(ConfigError::Validation(
                "store.dimensions must be positive".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Validation(
                "store.chunk_size must be positive".into(),
            ));
        }
        if self.hnsw_m < 2 {
            return Err(ConfigError::Validation(
                "store.hnsw_m must be at least 2".into(),
            ));
        }
        // pgvector rejects ef_construction < 2 * m at build time; catch it before any I/O.
        if self.hnsw_ef_construction < 2 * self.hnsw_m {
            return Err(ConfigError::Validation(format!(
                "store.hnsw_ef_construction ({}) must be at least 2 * hnsw_m ({})",
                self.hnsw_ef_construction,
                2 * self.hnsw_m
            )));
        }
        if !(1..=1000).contains(&self.hnsw_ef_search) {
            return Err(ConfigError::Validation(
                "store.hnsw_ef_search must be between 1 and 1000".into(),
            ));
        }
        Ok(())
    }
}

fn default_table_name() -> String {
    "documents".to_string()
}

fn default_hnsw_m() -> u32 {
    16
}

fn default_hnsw_ef_construction() -> u32 {
    64
}

fn default_hnsw_ef_search() -> u32 {
    40
}

fn default_chunk_size() -> usize {
    50
}

/// Distance metric for vector similarity search.
///
/// Fixed per store instance. Every metric reports a distance where smaller
/// means more similar:
/// - `L2`: Euclidean distance, `0..∞`.
/// - `Cosine`: cosine distance, `0` (identical) to `2` (opposite).
/// - `InnerProduct`: the negated inner product as returned by pgvector's
///   `<#>` operator, so a larger raw inner product sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DistanceMetric {
    /// Euclidean distance.
    #[default]
    L2,

    /// Cosine distance. Best for text embeddings.
    Cosine,

    /// Inner product. Requires normalized vectors for bounded scores.
    #[serde(alias = "inner_product")]
    InnerProduct,
}

impl DistanceMetric {
    /// Returns the pgvector operator class name for index creation.
    pub fn pgvector_ops_class(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "vector_l2_ops",
            DistanceMetric::Cosine => "vector_cosine_ops",
            DistanceMetric::InnerProduct => "vector_ip_ops",
        }
    }

    /// Returns the pgvector distance operator for queries.
    pub fn pgvector_operator(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "<->",
            DistanceMetric::Cosine => "<=>",
            DistanceMetric::InnerProduct => "<#>",
        }
    }

    /// Short name used in index names and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::InnerProduct => "ip",
        }
    }

    /// SQL expression computing the distance between `column` and `query`.
    ///
    /// The same expression is selected as the reported distance and used in
    /// `ORDER BY`, so the HNSW index serves the ordering. `<->` and `<=>`
    /// return distances; `<#>` returns the negated inner product. All three
    /// are therefore ascending for "more similar first" exactly as returned,
    /// and the reported value needs no per-metric sign fix-up.
    pub fn distance_sql(&self, column: &str, query: &str) -> String {
        format!("({} {} {}::vector)", column, self.pgvector_operator(), query)
    }

    /// Convert a normalized distance into a similarity score.
    ///
    /// - Cosine: `1 - distance` (1.0 for identical direction)
    /// - InnerProduct: `-distance`, i.e. the raw inner product
    /// - L2: `1 / (1 + distance)` (1.0 for identical vectors, tending to 0)
    pub fn distance_to_similarity(&self, distance: f64) -> f64 {
        match self {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::InnerProduct => -distance,
            DistanceMetric::L2 => 1.0 / (1.0 + distance),
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
