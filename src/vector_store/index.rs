//! HNSW index lifecycle.
//!
//! Index names are derived from the table and metric
//! (`{table}_embedding_{metric}_idx`) or, for partial indexes, also from a
//! caller-chosen name (`{table}_embedding_{metric}_{name}_idx`). Builds use
//! `CREATE INDEX CONCURRENTLY IF NOT EXISTS`, so repeated calls are no-ops and
//! ordinary reads and writes keep running while an index builds. A build
//! that finds an invalid index of the same name (left by a failed or
//! interrupted build) reports [`VectorStoreError::InvalidIndex`] instead of
//! succeeding; `recreate` replaces it.

use serde::Serialize;
use tracing::{instrument, warn};

use super::{FilterError, MetadataFilter, PgVectorStore, VectorStoreError, VectorStoreResult};
use crate::config::is_valid_identifier;

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Drop an existing index of the same name before building.
    pub recreate: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PartialIndexOptions {
    /// Rows the index covers. Required.
    pub filter: Option<MetadataFilter>,
    /// Drop an existing index of the same name before building.
    pub recreate: bool,
}

/// Observed state of a named index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// No index of that name.
    Absent,
    /// The index exists but is not valid yet: a concurrent build is still
    /// running, or a previous build failed and left it behind.
    Building,
    /// Valid and usable by the planner.
    Present,
}

impl PgVectorStore {
    /// Name of the full index for the configured metric.
    pub fn index_name(&self) -> String {
        format!(
            "{}_embedding_{}_idx",
            self.config.table_name,
            self.config.distance.as_str()
        )
    }

    /// Name of the partial index called `name` for the configured metric.
    pub fn partial_index_name(&self, name: &str) -> String {
        format!(
            "{}_embedding_{}_{}_idx",
            self.config.table_name,
            self.config.distance.as_str(),
            name
        )
    }

    /// Build the full HNSW index for the configured metric.
    #[instrument(
        skip(self),
        fields(backend = "pgvector", operation = "create_index", recreate = options.recreate)
    )]
    pub async fn create_index(&self, options: IndexOptions) -> VectorStoreResult<()> {
        let index = checked_name(self.index_name())?;
        let ddl = self.create_index_sql(&index, "");

        let start = self.start("create_index");
        let result = self
            .run_index_ddl("create_index", index, options.recreate, Some(ddl))
            .await;
        self.finish("create_index", start, result, |_| 1)
    }

    /// Build an HNSW index over the rows matching `options.filter`.
    ///
    /// The `WHERE` clause is the same predicate the store's queries carry
    /// for that filter, so the planner can use the index for them. Fails
    /// before any DDL when the filter is missing or constrains nothing.
    #[instrument(
        skip(self, options),
        fields(backend = "pgvector", operation = "create_partial_index", name = %name, recreate = options.recreate)
    )]
    pub async fn create_partial_index(
        &self,
        name: &str,
        options: PartialIndexOptions,
    ) -> VectorStoreResult<()> {
        let index = self.checked_partial_name(name)?;
        let filter = options
            .filter
            .as_ref()
            .filter(|filter| filter.compile().is_some())
            .ok_or(FilterError::Empty("create_partial_index"))?;
        let predicate = self.compile(Some(filter));
        let ddl = self.create_index_sql(&index, &predicate);

        let start = self.start("create_partial_index");
        let result = self
            .run_index_ddl("create_partial_index", index, options.recreate, Some(ddl))
            .await;
        self.finish("create_partial_index", start, result, |_| 1)
    }

    /// Drop the full index if it exists.
    #[instrument(skip(self), fields(backend = "pgvector", operation = "drop_index"))]
    pub async fn drop_index(&self) -> VectorStoreResult<()> {
        let index = checked_name(self.index_name())?;

        let start = self.start("drop_index");
        let result = self.run_index_ddl("drop_index", index, true, None).await;
        self.finish("drop_index", start, result, |_| 1)
    }

    /// Drop the partial index called `name` if it exists.
    #[instrument(skip(self), fields(backend = "pgvector", operation = "drop_partial_index", name = %name))]
    pub async fn drop_partial_index(&self, name: &str) -> VectorStoreResult<()> {
        let index = self.checked_partial_name(name)?;

        let start = self.start("drop_partial_index");
        let result = self
            .run_index_ddl("drop_partial_index", index, true, None)
            .await;
        self.finish("drop_partial_index", start, result, |_| 1)
    }

    /// State of the full index, or of the partial index called `name`.
    ///
    /// Asked of the read-write endpoint, which is where builds happen.
    #[instrument(skip(self), fields(backend = "pgvector", operation = "index_state"))]
    pub async fn index_state(&self, name: Option<&str>) -> VectorStoreResult<IndexState> {
        let index = match name {
            Some(name) => self.checked_partial_name(name)?,
            None => checked_name(self.index_name())?,
        };

        let start = self.start("index_state");
        let result = self
            .router
            .with_primary_connection("index_state", move |conn| {
                Box::pin(async move { Ok(fetch_index_state(conn, &index).await?) })
            })
            .await;
        self.finish("index_state", start, result, |_| 1)
    }

    fn checked_partial_name(&self, name: &str) -> VectorStoreResult<String> {
        if !is_valid_identifier(name) {
            return Err(FilterError::InvalidIndexName(name.to_string()).into());
        }
        checked_name(self.partial_index_name(name))
    }

    fn create_index_sql(&self, index: &str, predicate: &str) -> String {
        let mut ddl = format!(
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS {} ON {} USING hnsw (embedding {}) WITH (m = {}, ef_construction = {})",
            index,
            self.config.table_name,
            self.config.distance.pgvector_ops_class(),
            self.config.hnsw_m,
            self.config.hnsw_ef_construction,
        );
        if !predicate.is_empty() {
            ddl.push_str(" WHERE ");
            ddl.push_str(predicate);
        }
        ddl
    }

    /// Optionally drop `index`, then optionally run `create`, on one
    /// autocommit connection. A failed drop is returned without attempting
    /// the create.
    async fn run_index_ddl(
        &self,
        operation: &'static str,
        index: String,
        drop_first: bool,
        create: Option<String>,
    ) -> VectorStoreResult<()> {
        let drop = drop_first.then(|| format!("DROP INDEX CONCURRENTLY IF EXISTS {index}"));
        for sql in drop.iter().chain(create.iter()) {
            self.trace_sql(operation, sql);
        }

        let table = self.config.table_name.clone();
        self.router
            .with_write_connection(operation, move |conn| {
                Box::pin(async move {
                    if let Some(sql) = drop {
                        execute_ddl(conn, operation, &table, &index, "drop", &sql).await?;
                    }
                    if let Some(sql) = create {
                        execute_ddl(conn, operation, &table, &index, "create", &sql).await?;
                        // IF NOT EXISTS also skips an invalid leftover of an
                        // interrupted concurrent build.
                        let state = fetch_index_state(conn, &index).await?;
                        if state != IndexState::Present {
                            warn!(
                                stage = "index_ddl_failed",
                                backend = "pgvector",
                                operation = operation,
                                table_name = %table,
                                index = %index,
                                state = ?state,
                                "Index is not valid after build"
                            );
                            return Err(VectorStoreError::InvalidIndex { index });
                        }
                    }
                    Ok(())
                })
            })
            .await
    }
}

async fn execute_ddl(
    conn: &mut sqlx::PgConnection,
    operation: &'static str,
    table: &str,
    index: &str,
    action: &'static str,
    sql: &str,
) -> VectorStoreResult<()> {
    match sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(sql)).await {
        Ok(_) => Ok(()),
        Err(source) => {
            warn!(
                stage = "index_ddl_failed",
                backend = "pgvector",
                operation = operation,
                table_name = %table,
                index = %index,
                action = action,
                sql = %sql,
                error = %source,
                "Index DDL failed"
            );
            Err(VectorStoreError::IndexDdl {
                index: index.to_string(),
                action,
                source,
            })
        }
    }
}

/// Look up `pg_index.indisvalid` for `index`.
async fn fetch_index_state(
    conn: &mut sqlx::PgConnection,
    index: &str,
) -> Result<IndexState, sqlx::Error> {
    let row: Option<(bool,)> = sqlx::query_as(
        "SELECT i.indisvalid FROM pg_index i WHERE i.indexrelid = to_regclass($1)",
    )
    .bind(index)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(match row {
        None => IndexState::Absent,
        Some((true,)) => IndexState::Present,
        Some((false,)) => IndexState::Building,
    })
}

fn checked_name(index: String) -> VectorStoreResult<String> {
    if is_valid_identifier(&index) {
        Ok(index)
    } else {
        Err(FilterError::InvalidIndexName(index).into())
    }
}
