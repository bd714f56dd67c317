//! Connection factories behind the router.
//!
//! A factory only knows how to hand out a connection for one endpoint. The
//! router decides which factory to use and owns the scope (begin, commit,
//! rollback, release, deadline).

use std::{
    ops::{Deref, DerefMut},
    time::Duration,
};

use async_trait::async_trait;
use sqlx::{
    Connection, PgConnection, PgPool, Postgres,
    pool::PoolConnection,
    postgres::{PgConnectOptions, PgPoolOptions},
};

use crate::config::PoolConfig;

/// A connection checked out for the duration of one scoped operation.
pub enum ScopedConnection {
    /// A dedicated connection, closed on release.
    Direct(PgConnection),
    /// A pooled connection, returned to its pool on release.
    Pooled(PoolConnection<Postgres>),
}

impl ScopedConnection {
    /// Give the connection back: close it, or return it to its pool.
    pub async fn release(self) -> Result<(), sqlx::Error> {
        match self {
            ScopedConnection::Direct(conn) => conn.close().await,
            ScopedConnection::Pooled(conn) => {
                drop(conn);
                Ok(())
            }
        }
    }
}

impl Deref for ScopedConnection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        match self {
            ScopedConnection::Direct(conn) => conn,
            ScopedConnection::Pooled(conn) => &**conn,
        }
    }
}

impl DerefMut for ScopedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            ScopedConnection::Direct(conn) => conn,
            ScopedConnection::Pooled(conn) => &mut **conn,
        }
    }
}

/// Opens connections to one database endpoint on demand.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<ScopedConnection, sqlx::Error>;
}

/// Opens a fresh connection for every scope.
pub struct DirectConnector {
    options: PgConnectOptions,
    connect_timeout: Duration,
}

impl DirectConnector {
    pub fn new(options: PgConnectOptions, connect_timeout: Duration) -> Self {
        Self {
            options,
            connect_timeout,
        }
    }
}

#[async_trait]
impl ConnectionFactory for DirectConnector {
    async fn connect(&self) -> Result<ScopedConnection, sqlx::Error> {
        match tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&self.options))
            .await
        {
            Ok(conn) => conn.map(ScopedConnection::Direct),
            Err(_) => Err(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect timed out after {:?}", self.connect_timeout),
            ))),
        }
    }
}

/// Checks connections out of a lazily-connected `sqlx` pool.
pub struct PooledConnector {
    pool: PgPool,
}

impl PooledConnector {
    /// Build the pool without connecting; the first scope opens the first connection.
    pub fn new(options: PgConnectOptions, config: &PoolConfig, connect_timeout: Duration) -> Self {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(connect_timeout)
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect_lazy_with(options);
        Self { pool }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionFactory for PooledConnector {
    async fn connect(&self) -> Result<ScopedConnection, sqlx::Error> {
        self.pool.acquire().await.map(ScopedConnection::Pooled)
    }
}
