use std::collections::HashMap;

use tracing::instrument;
use uuid::Uuid;

use super::{
    FilterError, MetadataFilter, PgVectorStore, StoredDocument, VectorStoreResult, filter,
    search::stored_document,
};

impl PgVectorStore {
    /// Fetch documents by id, in the order the ids were given.
    ///
    /// Ids that don't exist or don't match the filter are skipped.
    #[instrument(
        skip(self, ids, filter),
        fields(backend = "pgvector", operation = "get_by_ids", count = ids.len())
    )]
    pub async fn get_by_ids(
        &self,
        ids: &[Uuid],
        filter: Option<&MetadataFilter>,
    ) -> VectorStoreResult<Vec<StoredDocument>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let start = self.start("get_by_ids");
        let sql = format!(
            "SELECT id, content, metadata, embedding::text AS embedding FROM {} WHERE id = ANY($1){}",
            self.config.table_name,
            filter::and_clause(&self.compile(filter)),
        );
        self.trace_sql("get_by_ids", &sql);

        let bound = ids.to_vec();
        let result = self
            .router
            .with_read_connection("get_by_ids", move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query(&sql).bind(&bound).fetch_all(&mut *conn).await?;
                    Ok(rows)
                })
            })
            .await;

        let result = result.and_then(|rows| {
            let mut found = HashMap::with_capacity(rows.len());
            for row in &rows {
                if let Some(document) = stored_document(row)? {
                    found.insert(document.id, document);
                }
            }
            Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
        });

        self.finish("get_by_ids", start, result, Vec::len)
    }

    /// Delete documents by id. Missing ids are not an error.
    ///
    /// Returns the number of rows removed.
    #[instrument(
        skip(self, ids, filter),
        fields(backend = "pgvector", operation = "delete_by_ids", count = ids.len())
    )]
    pub async fn delete_by_ids(
        &self,
        ids: &[Uuid],
        filter: Option<&MetadataFilter>,
    ) -> VectorStoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let start = self.start("delete_by_ids");
        let sql = format!(
            "DELETE FROM {} WHERE id = ANY($1){}",
            self.config.table_name,
            filter::and_clause(&self.compile(filter)),
        );
        self.trace_sql("delete_by_ids", &sql);

        let bound = ids.to_vec();
        let result = self
            .router
            .with_transaction("delete_by_ids", move |conn| {
                Box::pin(async move {
                    let done = sqlx::query(&sql).bind(&bound).execute(&mut *conn).await?;
                    Ok(done.rows_affected())
                })
            })
            .await;

        self.finish("delete_by_ids", start, result, |n| *n as usize)
    }

    /// Delete every document matching `filter` (and the store's defaults).
    ///
    /// The filter must constrain something; an empty one is rejected
    /// rather than clearing the table.
    #[instrument(skip(self, filter), fields(backend = "pgvector", operation = "delete_by_filter"))]
    pub async fn delete_by_filter(&self, filter: &MetadataFilter) -> VectorStoreResult<u64> {
        if filter.compile().is_none() {
            return Err(FilterError::Empty("delete_by_filter").into());
        }

        let start = self.start("delete_by_filter");
        let sql = format!(
            "DELETE FROM {}{}",
            self.config.table_name,
            filter::where_clause(&self.compile(Some(filter))),
        );
        self.trace_sql("delete_by_filter", &sql);

        let result = self
            .router
            .with_transaction("delete_by_filter", move |conn| {
                Box::pin(async move {
                    let done = sqlx::query(&sql).execute(&mut *conn).await?;
                    Ok(done.rows_affected())
                })
            })
            .await;

        self.finish("delete_by_filter", start, result, |n| *n as usize)
    }
}
