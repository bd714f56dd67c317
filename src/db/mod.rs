//! Connection routing for the vector store.
//!
//! Two logical endpoints are resolved from configuration: a read-write
//! primary and a read-only endpoint (a replica, or the primary again when no
//! replica is configured). Every database access goes through one of the
//! router's scopes, which guarantee the connection is released on every exit
//! path and that the scope finishes within its deadline.

mod connection;
mod error;

use std::{fmt, future::Future, sync::Arc, time::Duration};

pub use connection::{ConnectionFactory, DirectConnector, PooledConnector, ScopedConnection};
pub use error::{DbError, DbResult};
use futures::future::BoxFuture;
use sqlx::{Connection, PgConnection, postgres::PgConnectOptions};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;

/// Name reported to PostgreSQL in `pg_stat_activity`.
const APPLICATION_NAME: &str = "pgvs";

/// Which endpoint a connection was opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    ReadWrite,
    ReadOnly,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::ReadWrite => f.write_str("read-write"),
            ConnectionRole::ReadOnly => f.write_str("read-only"),
        }
    }
}

/// Routes scoped work to the read-write or read-only endpoint.
///
/// Owned by the store for its whole lifetime. The factories either open a
/// fresh connection per scope or check one out of a pool; the scopes behave
/// the same either way.
pub struct ConnectionRouter {
    write: Arc<dyn ConnectionFactory>,
    read: Arc<dyn ConnectionFactory>,
    operation_timeout: Option<Duration>,
    ddl_timeout: Option<Duration>,
}

impl ConnectionRouter {
    pub fn new(write: Arc<dyn ConnectionFactory>, read: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            write,
            read,
            operation_timeout: None,
            ddl_timeout: None,
        }
    }

    /// Deadline applied to transactional and read scopes.
    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Deadline applied to non-transactional DDL scopes.
    pub fn with_ddl_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ddl_timeout = timeout;
        self
    }

    /// Build both factories from configuration. Performs no I/O.
    ///
    /// The read endpoint falls back to the primary URL, and its sessions
    /// default to read-only transactions either way.
    pub fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        let write_options = parse_options(&config.url, ConnectionRole::ReadWrite)?;
        let read_options = parse_options(config.read_url(), ConnectionRole::ReadOnly)?
            .options([("default_transaction_read_only", "on")]);

        if config.read_url.is_some() {
            info!("Configuring read replica endpoint");
        }

        let connect_timeout = config.connect_timeout();
        let (write, read): (Arc<dyn ConnectionFactory>, Arc<dyn ConnectionFactory>) =
            match &config.pool {
                Some(pool) => (
                    Arc::new(PooledConnector::new(write_options, pool, connect_timeout)),
                    Arc::new(PooledConnector::new(read_options, pool, connect_timeout)),
                ),
                None => (
                    Arc::new(DirectConnector::new(write_options, connect_timeout)),
                    Arc::new(DirectConnector::new(read_options, connect_timeout)),
                ),
            };

        Ok(Self::new(write, read)
            .with_operation_timeout(config.operation_timeout())
            .with_ddl_timeout(config.ddl_timeout()))
    }

    /// Run `f` inside a transaction on a dedicated read-write connection.
    ///
    /// Commits when `f` succeeds. When `f` fails the transaction is rolled
    /// back and `f`'s error is returned; a rollback failure is logged and
    /// never replaces it. The connection is released on every path.
    pub async fn with_transaction<T, E, F>(&self, operation: &'static str, f: F) -> Result<T, E>
    where
        T: Send,
        E: From<DbError> + fmt::Display + Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>> + Send,
    {
        let work = async {
            let mut conn = self.acquire(ConnectionRole::ReadWrite, operation).await?;
            let outcome = run_in_transaction(&mut conn, operation, f).await;
            settle(conn, ConnectionRole::ReadWrite, operation, outcome).await
        };
        within(self.operation_timeout, operation, work).await
    }

    /// Run `f` on a read-only connection without a transaction wrapper.
    pub async fn with_read_connection<T, E, F>(
        &self,
        operation: &'static str,
        f: F,
    ) -> Result<T, E>
    where
        T: Send,
        E: From<DbError> + fmt::Display + Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>> + Send,
    {
        let work = async {
            let mut conn = self.acquire(ConnectionRole::ReadOnly, operation).await?;
            let outcome = f(&mut conn).await;
            settle(conn, ConnectionRole::ReadOnly, operation, outcome).await
        };
        within(self.operation_timeout, operation, work).await
    }

    /// Run `f` on a read-write connection in autocommit mode.
    ///
    /// For statements that PostgreSQL refuses inside a transaction block,
    /// such as `CREATE INDEX CONCURRENTLY`. Uses the DDL deadline.
    pub async fn with_write_connection<T, E, F>(
        &self,
        operation: &'static str,
        f: F,
    ) -> Result<T, E>
    where
        T: Send,
        E: From<DbError> + fmt::Display + Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>> + Send,
    {
        self.on_primary(self.ddl_timeout, operation, f).await
    }

    /// Run `f` on a read-write connection in autocommit mode under the
    /// operation deadline. For reads that must see the primary's state,
    /// such as catalog lookups.
    pub async fn with_primary_connection<T, E, F>(
        &self,
        operation: &'static str,
        f: F,
    ) -> Result<T, E>
    where
        T: Send,
        E: From<DbError> + fmt::Display + Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>> + Send,
    {
        self.on_primary(self.operation_timeout, operation, f).await
    }

    async fn on_primary<T, E, F>(
        &self,
        deadline: Option<Duration>,
        operation: &'static str,
        f: F,
    ) -> Result<T, E>
    where
        T: Send,
        E: From<DbError> + fmt::Display + Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>> + Send,
    {
        let work = async {
            let mut conn = self.acquire(ConnectionRole::ReadWrite, operation).await?;
            let outcome = f(&mut conn).await;
            settle(conn, ConnectionRole::ReadWrite, operation, outcome).await
        };
        within(deadline, operation, work).await
    }

    async fn acquire(
        &self,
        role: ConnectionRole,
        operation: &'static str,
    ) -> DbResult<ScopedConnection> {
        let factory = match role {
            ConnectionRole::ReadWrite => &self.write,
            ConnectionRole::ReadOnly => &self.read,
        };
        factory.connect().await.map_err(|source| {
            warn!(
                role = %role,
                operation = operation,
                error = %source,
                "Failed to open database connection"
            );
            DbError::Connect {
                role,
                operation,
                source,
            }
        })
    }
}

fn parse_options(url: &str, role: ConnectionRole) -> DbResult<PgConnectOptions> {
    url.parse::<PgConnectOptions>()
        .map(|options| options.application_name(APPLICATION_NAME))
        .map_err(|source| DbError::InvalidUrl { role, source })
}

async fn run_in_transaction<T, E, F>(
    conn: &mut PgConnection,
    operation: &'static str,
    f: F,
) -> Result<T, E>
where
    E: From<DbError> + fmt::Display,
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>>,
{
    let mut tx = conn.begin().await.map_err(DbError::from)?;
    match f(&mut tx).await {
        Ok(value) => {
            tx.commit().await.map_err(DbError::from)?;
            debug!(operation = operation, "Transaction committed");
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(
                    operation = operation,
                    error = %rollback_err,
                    original_error = %err,
                    "Rollback failed"
                );
            } else {
                debug!(operation = operation, error = %err, "Transaction rolled back");
            }
            Err(err)
        }
    }
}

/// Release the connection and decide what the scope returns.
///
/// A close failure after successful work is surfaced; after failed work it is
/// only logged so the original error reaches the caller.
async fn settle<T, E>(
    conn: ScopedConnection,
    role: ConnectionRole,
    operation: &'static str,
    outcome: Result<T, E>,
) -> Result<T, E>
where
    E: From<DbError> + fmt::Display,
{
    match (conn.release().await, outcome) {
        (Ok(()), outcome) => outcome,
        (Err(source), Ok(_)) => Err(DbError::Close {
            role,
            operation,
            source,
        }
        .into()),
        (Err(close_err), Err(err)) => {
            warn!(
                role = %role,
                operation = operation,
                error = %close_err,
                original_error = %err,
                "Failed to close connection after failed operation"
            );
            Err(err)
        }
    }
}

async fn within<T, E, Fut>(
    deadline: Option<Duration>,
    operation: &'static str,
    work: Fut,
) -> Result<T, E>
where
    E: From<DbError>,
    Fut: Future<Output = Result<T, E>>,
{
    let Some(after) = deadline else {
        return work.await;
    };
    match tokio::time::timeout(after, work).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation = operation,
                deadline_ms = after.as_millis() as u64,
                "Database operation exceeded its deadline"
            );
            Err(DbError::Timeout { operation, after }.into())
        }
    }
}
