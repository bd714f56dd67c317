use std::time::Duration;

use thiserror::Error;

use super::ConnectionRole;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Invalid {role} connection string: {source}")]
    InvalidUrl {
        role: ConnectionRole,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to open {role} connection for {operation}: {source}")]
    Connect {
        role: ConnectionRole,
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to close {role} connection after {operation}: {source}")]
    Close {
        role: ConnectionRole,
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("{operation} exceeded its deadline of {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;
