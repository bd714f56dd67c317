use std::{fmt::Write as _, ops::Range};

use serde_json::{Map, Value};
use sqlx::types::Json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{Document, PgVectorStore, VectorStoreError, VectorStoreResult, literal};
use crate::embedding::EmbeddingError;

/// One failed ingestion chunk.
#[derive(Debug)]
pub struct ChunkFailure {
    /// Zero-based chunk index.
    pub chunk: usize,
    /// Positions of the chunk's rows in the caller's input.
    pub rows: Range<usize>,
    pub error: Box<VectorStoreError>,
}

/// A row ready for insertion.
struct PendingRow {
    id: Uuid,
    content: String,
    metadata: Map<String, Value>,
    embedding: Vec<f64>,
}

impl PgVectorStore {
    /// Embed `documents` in one batch and insert them.
    ///
    /// Returns the ids of every inserted row, in input order. See
    /// [`add_vectors`](Self::add_vectors) for the chunking contract.
    #[instrument(
        skip(self, documents),
        fields(backend = "pgvector", operation = "add_documents", count = documents.len())
    )]
    pub async fn add_documents(&self, documents: Vec<Document>) -> VectorStoreResult<Vec<Uuid>> {
        if documents.is_empty() {
            info!(
                backend = "pgvector",
                operation = "add_documents",
                "No documents to add"
            );
            return Ok(Vec::new());
        }

        let start = self.start("add_documents");
        let result = self.embed_and_ingest(documents).await;
        self.finish("add_documents", start, result, Vec::len)
    }

    /// Insert documents with pre-computed embeddings.
    ///
    /// Rows are written in chunks of `chunk_size`, one transaction per chunk,
    /// strictly one after another. A failing chunk does not stop the rest:
    /// once every chunk has been attempted, any failures are reported
    /// together as [`VectorStoreError::PartialIngest`], and rows from the
    /// chunks that succeeded stay committed.
    #[instrument(
        skip(self, vectors, documents),
        fields(backend = "pgvector", operation = "add_vectors", count = documents.len())
    )]
    pub async fn add_vectors(
        &self,
        vectors: Vec<Vec<f64>>,
        documents: Vec<Document>,
    ) -> VectorStoreResult<Vec<Uuid>> {
        if vectors.len() != documents.len() {
            return Err(VectorStoreError::VectorCountMismatch {
                vectors: vectors.len(),
                documents: documents.len(),
            });
        }
        if documents.is_empty() {
            info!(
                backend = "pgvector",
                operation = "add_vectors",
                "No documents to add"
            );
            return Ok(Vec::new());
        }

        let start = self.start("add_vectors");
        let result = self.ingest(vectors, documents).await;
        self.finish("add_vectors", start, result, Vec::len)
    }

    async fn embed_and_ingest(&self, documents: Vec<Document>) -> VectorStoreResult<Vec<Uuid>> {
        let provider = self.embedding_provider()?;
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = provider.embed_documents(&texts).await?;
        if vectors.len() != documents.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: documents.len(),
                actual: vectors.len(),
            }
            .into());
        }
        self.ingest(vectors, documents).await
    }

    /// Chunked insert shared by both entry points. Expects one vector per
    /// document.
    async fn ingest(
        &self,
        vectors: Vec<Vec<f64>>,
        documents: Vec<Document>,
    ) -> VectorStoreResult<Vec<Uuid>> {
        let rows: Vec<PendingRow> = documents
            .into_iter()
            .zip(vectors)
            .map(|(document, embedding)| PendingRow {
                id: document.id.unwrap_or_else(Uuid::new_v4),
                content: document.content,
                metadata: document.metadata,
                embedding,
            })
            .collect();

        let ranges = chunk_ranges(rows.len(), self.config.chunk_size);
        let total_chunks = ranges.len();
        let mut inserted = Vec::with_capacity(rows.len());
        let mut failures = Vec::new();

        for (chunk, range) in ranges.into_iter().enumerate() {
            match self.insert_chunk(&rows[range.clone()]).await {
                Ok(ids) => inserted.extend(ids),
                Err(error) => {
                    warn!(
                        backend = "pgvector",
                        chunk = chunk,
                        rows = ?range,
                        error = %error,
                        "Ingestion chunk failed"
                    );
                    failures.push(ChunkFailure {
                        chunk,
                        rows: range,
                        error: Box::new(error),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(inserted)
        } else {
            Err(VectorStoreError::PartialIngest {
                failures,
                inserted,
                total_chunks,
            })
        }
    }

    /// Insert one chunk in its own transaction with a single statement.
    async fn insert_chunk(&self, rows: &[PendingRow]) -> VectorStoreResult<Vec<Uuid>> {
        for row in rows {
            self.check_dimensions("add_vectors", &row.embedding)?;
        }

        let records: Vec<Value> = rows.iter().map(record).collect();
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let sql = format!(
            r#"
            INSERT INTO {} (id, content, metadata, embedding)
            SELECT x.id, x.content, x.metadata, x.embedding::vector
            FROM jsonb_to_recordset($1::jsonb)
                AS x(id uuid, content text, metadata jsonb, embedding text)
            "#,
            self.config.table_name
        );
        self.trace_sql("add_vectors", &sql);

        self.router
            .with_transaction("add_vectors", move |conn| {
                Box::pin(async move {
                    sqlx::query(&sql)
                        .bind(Json(Value::Array(records)))
                        .execute(&mut *conn)
                        .await?;
                    Ok(ids)
                })
            })
            .await
    }
}

/// JSON record for `jsonb_to_recordset`. The embedding travels as its
/// vector literal and is cast back to `vector` in SQL.
fn record(row: &PendingRow) -> Value {
    let mut record = Map::with_capacity(4);
    record.insert("id".into(), Value::String(row.id.to_string()));
    record.insert("content".into(), Value::String(row.content.clone()));
    record.insert("metadata".into(), Value::Object(row.metadata.clone()));
    record.insert(
        "embedding".into(),
        Value::String(literal::encode(&row.embedding)),
    );
    Value::Object(record)
}

/// Split `len` rows into consecutive ranges of at most `size` rows.
fn chunk_ranges(len: usize, size: usize) -> Vec<Range<usize>> {
    let size = size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

pub(super) fn describe_failures(
    failures: &[ChunkFailure],
    inserted: &[Uuid],
    total_chunks: &usize,
) -> String {
    let mut message = format!(
        "Ingestion failed for {} of {} chunks ({} rows committed)",
        failures.len(),
        total_chunks,
        inserted.len()
    );
    for failure in failures {
        let _ = write!(
            message,
            "; chunk {} (rows {}..{}): {}",
            failure.chunk, failure.rows.start, failure.rows.end, failure.error
        );
    }
    message
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 50, vec![])]
    #[case(3, 50, vec![0..3])]
    #[case(6, 2, vec![0..2, 2..4, 4..6])]
    #[case(7, 3, vec![0..3, 3..6, 6..7])]
    #[case(2, 0, vec![0..1, 1..2])]
    fn test_chunk_ranges(
        #[case] len: usize,
        #[case] size: usize,
        #[case] expected: Vec<Range<usize>>,
    ) {
        assert_eq!(chunk_ranges(len, size), expected);
    }

    #[test]
    fn test_record_shape() {
        let id = Uuid::new_v4();
        let mut metadata = Map::new();
        metadata.insert("tenant".into(), Value::from("acme"));
        let row = PendingRow {
            id,
            content: "hello".into(),
            metadata,
            embedding: vec![1.0, 0.5],
        };

        let record = record(&row);
        assert_eq!(record["id"], Value::String(id.to_string()));
        assert_eq!(record["content"], "hello");
        assert_eq!(record["metadata"]["tenant"], "acme");
        assert_eq!(record["embedding"], "[1,0.5]");
    }

    #[test]
    fn test_partial_ingest_message_names_every_chunk() {
        let failures = vec![
            ChunkFailure {
                chunk: 1,
                rows: 2..4,
                error: Box::new(VectorStoreError::DimensionMismatch {
                    expected: 4,
                    actual: 3,
                }),
            },
            ChunkFailure {
                chunk: 3,
                rows: 6..7,
                error: Box::new(VectorStoreError::VectorLiteral("boom".into())),
            },
        ];
        let error = VectorStoreError::PartialIngest {
            failures,
            inserted: vec![Uuid::new_v4(), Uuid::new_v4()],
            total_chunks: 4,
        };

        let message = error.to_string();
        assert!(message.starts_with("Ingestion failed for 2 of 4 chunks (2 rows committed)"));
        assert!(message.contains("chunk 1 (rows 2..4): Vector dimension mismatch: expected 4, got 3"));
        assert!(message.contains("chunk 3 (rows 6..7): Invalid vector literal: boom"));
    }
}
