//! pgvector-backed document store.
//!
//! Documents live in a single table (`id`, `content`, `metadata`,
//! `embedding`). Writes go through short transactions on the read-write
//! endpoint, searches and lookups through the read-only endpoint, and index
//! DDL through autocommit connections so `CONCURRENTLY` builds never block
//! ordinary traffic.

mod filter;
mod index;
mod ingest;
pub mod literal;
mod lookup;
mod schema;
mod search;


use std::{sync::Arc, time::Instant};

pub use filter::{FilterError, MetadataFilter, compile_filter};
pub use index::{IndexOptions, IndexState, PartialIndexOptions};
pub use ingest::ChunkFailure;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::{ConfigError, DistanceMetric, PgvsConfig, StoreConfig},
    db::{ConnectionRouter, DbError},
    embedding::{EmbeddingError, EmbeddingProvider, OpenAiEmbeddings},
    observability::metrics::record_vector_store_operation,
};

const BACKEND: &str = "pgvector";

/// A document to be stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Caller-chosen id. A v4 UUID is generated when absent.
    #[serde(default)]
    pub id: Option<Uuid>,

    pub content: String,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A document as read back from the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: Uuid,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub embedding: Vec<f64>,
}

/// A search hit. `distance` is ascending-is-better for every metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    #[serde(flatten)]
    pub document: StoredDocument,
    pub distance: f64,
    pub distance_metric: DistanceMetric,
}

impl ScoredDocument {
    /// Metric-aware similarity, larger is better.
    pub fn similarity(&self) -> f64 {
        self.distance_metric.distance_to_similarity(self.distance)
    }
}

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("Invalid store configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Got {vectors} vectors for {documents} documents")]
    VectorCountMismatch { vectors: usize, documents: usize },

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("No embedding provider configured")]
    NoEmbeddingProvider,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Failed to {action} index {index}: {source}")]
    IndexDdl {
        index: String,
        action: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Index {index} exists but is not valid; rebuild it with recreate")]
    InvalidIndex { index: String },

    #[error("Invalid vector literal: {0}")]
    VectorLiteral(String),

    #[error("{}", ingest::describe_failures(.failures, .inserted, .total_chunks))]
    PartialIngest {
        /// Every chunk that failed, in chunk order.
        failures: Vec<ChunkFailure>,
        /// Ids committed by the chunks that succeeded. They stay committed.
        inserted: Vec<Uuid>,
        total_chunks: usize,
    },
}

impl From<sqlx::Error> for VectorStoreError {
    fn from(e: sqlx::Error) -> Self {
        VectorStoreError::Db(DbError::Sqlx(e))
    }
}

pub type VectorStoreResult<T> = Result<T, VectorStoreError>;

/// Vector store over a single pgvector table.
pub struct PgVectorStore {
    router: ConnectionRouter,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    config: StoreConfig,
}

impl PgVectorStore {
    /// Create a store without touching the database.
    ///
    /// The configuration is validated here so bad metrics, table names or
    /// HNSW parameters fail before any I/O.
    pub fn new(router: ConnectionRouter, config: StoreConfig) -> VectorStoreResult<Self> {
        config.validate()?;
        Ok(Self {
            router,
            embeddings: None,
            config,
        })
    }

    /// Create a store and make sure its schema exists.
    pub async fn initialize(
        router: ConnectionRouter,
        config: StoreConfig,
    ) -> VectorStoreResult<Self> {
        let store = Self::new(router, config)?;
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Build the router, the store and (if configured) the embedding
    /// provider from a full configuration. Performs no I/O.
    pub fn from_config(config: &PgvsConfig) -> VectorStoreResult<Self> {
        let router = ConnectionRouter::from_config(&config.database)?;
        let store = Self::new(router, config.store.clone())?;
        match &config.embeddings {
            Some(embeddings) => {
                let provider = OpenAiEmbeddings::from_config(embeddings)?;
                store.with_embeddings(Arc::new(provider))
            }
            None => Ok(store),
        }
    }

    /// Attach the provider used by `add_documents` and `similarity_search`.
    pub fn with_embeddings(
        mut self,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> VectorStoreResult<Self> {
        if let Some(dimensions) = provider.dimensions()
            && dimensions != self.config.dimensions
        {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: dimensions,
            });
        }
        self.embeddings = Some(provider);
        Ok(self)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn distance_metric(&self) -> DistanceMetric {
        self.config.distance
    }

    fn embedding_provider(&self) -> VectorStoreResult<&dyn EmbeddingProvider> {
        self.embeddings
            .as_deref()
            .ok_or(VectorStoreError::NoEmbeddingProvider)
    }

    /// The predicate every read, delete and partial index carries.
    fn compile(&self, per_call: Option<&MetadataFilter>) -> String {
        compile_filter(per_call, &self.config.filters)
    }

    fn check_dimensions(&self, operation: &'static str, vector: &[f64]) -> VectorStoreResult<()> {
        if vector.len() == self.config.dimensions {
            return Ok(());
        }
        warn!(
            stage = "vector_operation_completed",
            backend = BACKEND,
            operation = operation,
            status = "error",
            error = "dimension_mismatch",
            expected = self.config.dimensions,
            actual = vector.len(),
            "Vector dimension mismatch"
        );
        Err(VectorStoreError::DimensionMismatch {
            expected: self.config.dimensions,
            actual: vector.len(),
        })
    }

    /// Emit generated SQL when `verbose` is set.
    fn trace_sql(&self, operation: &'static str, sql: &str) {
        if self.config.verbose {
            info!(
                stage = "vector_sql",
                backend = BACKEND,
                operation = operation,
                table_name = %self.config.table_name,
                sql = %sql,
                "Generated SQL"
            );
        }
    }

    fn start(&self, operation: &'static str) -> Instant {
        debug!(
            stage = "vector_operation_started",
            backend = BACKEND,
            operation = operation,
            table_name = %self.config.table_name,
            "Starting vector store operation"
        );
        Instant::now()
    }

    /// Log and record the outcome of a public operation, then hand it back.
    fn finish<T>(
        &self,
        operation: &'static str,
        start: Instant,
        result: VectorStoreResult<T>,
        item_count: impl FnOnce(&T) -> usize,
    ) -> VectorStoreResult<T> {
        let duration = start.elapsed().as_secs_f64();
        let duration_ms = (duration * 1000.0) as u64;
        match &result {
            Ok(value) => {
                let items = item_count(value);
                record_vector_store_operation(
                    BACKEND,
                    operation,
                    "success",
                    duration,
                    items as u32,
                );
                info!(
                    stage = "vector_operation_completed",
                    backend = BACKEND,
                    operation = operation,
                    status = "success",
                    duration_ms = duration_ms,
                    item_count = items,
                    "Vector store operation completed"
                );
            }
            Err(e) => {
                record_vector_store_operation(BACKEND, operation, "error", duration, 0);
                warn!(
                    stage = "vector_operation_completed",
                    backend = BACKEND,
                    operation = operation,
                    status = "error",
                    duration_ms = duration_ms,
                    error = %e,
                    "Vector store operation failed"
                );
            }
        }
        result
    }
}
