use tracing::instrument;

use super::{PgVectorStore, VectorStoreError, VectorStoreResult};

impl PgVectorStore {
    /// Create the extension, the table and its metadata index if missing.
    ///
    /// Runs in one transaction. Existing structures are left untouched; an
    /// existing `embedding` column with a different dimensionality is
    /// reported as a dimension mismatch and nothing is changed.
    #[instrument(skip(self), fields(backend = "pgvector", operation = "ensure_schema"))]
    pub async fn ensure_schema(&self) -> VectorStoreResult<()> {
        let start = self.start("ensure_schema");

        let table = self.config.table_name.clone();
        let dimensions = self.config.dimensions;
        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                content TEXT,
                metadata JSONB,
                embedding vector({dimensions})
            )
            "#
        );
        let create_metadata_index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_metadata_idx ON {table} USING gin (metadata jsonb_path_ops)"
        );
        self.trace_sql("ensure_schema", &create_table);
        self.trace_sql("ensure_schema", &create_metadata_index);

        let result = self
            .router
            .with_transaction("ensure_schema", move |conn| {
                Box::pin(async move {
                    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query(&create_table).execute(&mut *conn).await?;

                    // pgvector stores the declared dimensionality as the column typmod.
                    let declared: Option<(i32,)> = sqlx::query_as(
                        r#"
                        SELECT a.atttypmod
                        FROM pg_attribute a
                        WHERE a.attrelid = to_regclass($1)
                          AND a.attname = 'embedding'
                          AND NOT a.attisdropped
                        "#,
                    )
                    .bind(&table)
                    .fetch_optional(&mut *conn)
                    .await?;
                    if let Some((typmod,)) = declared
                        && typmod > 0
                        && typmod as usize != dimensions
                    {
                        return Err(VectorStoreError::DimensionMismatch {
                            expected: dimensions,
                            actual: typmod as usize,
                        });
                    }

                    sqlx::query(&create_metadata_index)
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .await;

        self.finish("ensure_schema", start, result, |_| 0)
    }
}
