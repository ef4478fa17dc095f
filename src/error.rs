use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;
#[cfg(feature = "postgres")]
use tokio_postgres;

/// Boxed caller error carried through [`SqlDaoError::Business`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum SqlDaoError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    #[error("No transaction: {0}")]
    NoTransaction(String),

    #[error("Query returned more than one row: {0}")]
    MultipleRows(String),

    #[error("Statement build error: {0}")]
    StatementError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Value conversion error: {0}")]
    ConversionError(String),

    #[error("Commit failed: {0}")]
    CommitError(String),

    #[error("Rollback failed: {0}")]
    RollbackError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out")]
    Timeout,

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    #[error(transparent)]
    Business(BoxError),

    #[error("{operation}: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: Box<SqlDaoError>,
    },

    #[error("transaction rolled back: {source}{}", rollback_note(.rollback_error))]
    TransactionAborted {
        #[source]
        source: Box<SqlDaoError>,
        rollback_error: Option<Box<SqlDaoError>>,
    },
}

fn rollback_note(rollback_error: &Option<Box<SqlDaoError>>) -> String {
    match rollback_error {
        Some(err) => format!(" (rollback also failed: {err})"),
        None => String::new(),
    }
}

impl SqlDaoError {
    /// Wrap a caller-defined error so it can be returned from transactional work.
    pub fn business<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SqlDaoError::Business(Box::new(err))
    }

    /// Tag this error with the public operation that produced it.
    #[must_use]
    pub fn in_operation(self, operation: &'static str) -> Self {
        SqlDaoError::Operation {
            operation,
            source: Box::new(self),
        }
    }

    /// Innermost error behind any operation or transaction wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &SqlDaoError {
        match self {
            SqlDaoError::Operation { source, .. }
            | SqlDaoError::TransactionAborted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether the innermost error was caused by cancellation or a deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.root_cause(),
            SqlDaoError::Cancelled | SqlDaoError::Timeout
        )
    }
}
