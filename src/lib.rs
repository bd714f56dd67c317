//! Document store on PostgreSQL + pgvector.
//!
//! Stores text, JSON metadata and embeddings in one table, answers
//! nearest-neighbour queries under L2, cosine or inner-product distance, and
//! manages full and partial HNSW indexes.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use pgvs::{Document, MetadataFilter, PgVectorStore, PgvsConfig};
//!
//! let config = PgvsConfig::from_file("pgvs.toml")?;
//! let store = PgVectorStore::from_config(&config)?;
//! store.ensure_schema().await?;
//!
//! store
//!     .add_documents(vec![Document::new("hello world").with_metadata("lang", "en")])
//!     .await?;
//! let hits = store
//!     .similarity_search("greeting", 4, Some(&MetadataFilter::equals("lang", "en")))
//!     .await?;
//! for hit in hits {
//!     println!("{:.3} {}", hit.similarity(), hit.document.content);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod embedding;
pub mod observability;
pub mod vector_store;

pub use config::{DistanceMetric, PgvsConfig, StoreConfig};
pub use db::ConnectionRouter;
pub use embedding::{EmbeddingProvider, OpenAiEmbeddings};
pub use vector_store::{
    Document, IndexOptions, IndexState, MetadataFilter, PartialIndexOptions, PgVectorStore,
    ScoredDocument, StoredDocument, VectorStoreError, VectorStoreResult,
};
