use serde_json::{Map, Value};
use sqlx::{Connection, Row, postgres::PgRow, types::Json};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    MetadataFilter, PgVectorStore, ScoredDocument, StoredDocument, VectorStoreResult, filter,
    literal,
};

impl PgVectorStore {
    /// Embed `query` and return the `k` nearest documents, best first.
    #[instrument(
        skip(self, query, filter),
        fields(backend = "pgvector", operation = "similarity_search", k = k)
    )]
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> VectorStoreResult<Vec<ScoredDocument>> {
        let embedding = self.embed_query(query).await?;
        self.similarity_search_by_vector(&embedding, k, filter, 0)
            .await
    }

    /// Embed a query text with the store's provider.
    pub async fn embed_query(&self, query: &str) -> VectorStoreResult<Vec<f64>> {
        let provider = self.embedding_provider()?;
        Ok(provider.embed_query(query).await?)
    }

    /// Nearest-neighbour query against the configured metric.
    ///
    /// Results are ordered by ascending `distance` for every metric (inner
    /// product reports pgvector's negated `<#>` value). `hnsw.ef_search` is
    /// set for this query only. An empty result is not an error.
    #[instrument(
        skip(self, embedding, filter),
        fields(backend = "pgvector", operation = "similarity_search_by_vector", k = k, offset = offset)
    )]
    pub async fn similarity_search_by_vector(
        &self,
        embedding: &[f64],
        k: usize,
        filter: Option<&MetadataFilter>,
        offset: usize,
    ) -> VectorStoreResult<Vec<ScoredDocument>> {
        self.check_dimensions("similarity_search", embedding)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let start = self.start("similarity_search");

        let query = literal::encode(embedding);
        let predicate = self.compile(filter);
        let distance = self.config.distance.distance_sql("embedding", "$1");
        let sql = format!(
            r#"
            SELECT id, content, metadata, embedding::text AS embedding, {distance} AS distance
            FROM {table}{where_clause}
            ORDER BY {distance}
            LIMIT $2 OFFSET $3
            "#,
            table = self.config.table_name,
            where_clause = filter::where_clause(&predicate),
        );
        // SET cannot take bind parameters; the value is a validated integer.
        let set_ef_search = format!("SET LOCAL hnsw.ef_search = {}", self.config.hnsw_ef_search);
        self.trace_sql("similarity_search", &sql);

        let limit = k as i64;
        let offset = offset as i64;
        let result = self
            .router
            .with_read_connection("similarity_search", move |conn| {
                Box::pin(async move {
                    // SET LOCAL only lives as long as the enclosing transaction.
                    let mut tx = conn.begin().await?;
                    sqlx::query(&set_ef_search).execute(&mut *tx).await?;
                    let rows = sqlx::query(&sql)
                        .bind(&query)
                        .bind(limit)
                        .bind(offset)
                        .fetch_all(&mut *tx)
                        .await?;
                    tx.commit().await?;
                    Ok(rows)
                })
            })
            .await;

        let metric = self.config.distance;
        let result = result.and_then(|rows| {
            let total = rows.len();
            let mut scored = Vec::with_capacity(total);
            for row in &rows {
                let Some(distance) = row.try_get::<Option<f64>, _>("distance")? else {
                    continue;
                };
                let Some(document) = stored_document(row)? else {
                    continue;
                };
                scored.push(ScoredDocument {
                    document,
                    distance,
                    distance_metric: metric,
                });
            }
            if scored.len() < total {
                debug!(
                    backend = "pgvector",
                    operation = "similarity_search",
                    dropped = total - scored.len(),
                    "Dropped rows without content or distance"
                );
            }
            Ok(scored)
        });

        self.finish("similarity_search", start, result, Vec::len)
    }
}

/// Map a row with `id`, `content`, `metadata` and `embedding::text` columns.
///
/// Rows without content yield `None`. A non-object `metadata` value is
/// read as an empty map.
pub(super) fn stored_document(row: &PgRow) -> VectorStoreResult<Option<StoredDocument>> {
    let Some(content) = row.try_get::<Option<String>, _>("content")? else {
        return Ok(None);
    };
    let id: Uuid = row.try_get("id")?;
    let metadata = match row.try_get::<Option<Json<Value>>, _>("metadata")? {
        Some(Json(Value::Object(map))) => map,
        _ => Map::new(),
    };
    let embedding = match row.try_get::<Option<String>, _>("embedding")? {
        Some(text) => literal::decode(&text)?,
        None => Vec::new(),
    };
    Ok(Some(StoredDocument {
        id,
        content,
        metadata,
        embedding,
    }))
}
