//! The interface the core consumes from a physical database driver.
//!
//! A [`Driver`] wraps a pool or connection, hands out [`DriverTx`] transactions and returns
//! [`Cursor`]s over query results. Built-in implementations exist for `SQLite` and PostgreSQL;
//! any other backend plugs in through [`crate::DataSourceBuilder::driver`].
use std::any::Any;
use std::fmt;

use async_trait::async_trait;

use crate::config::TxOptions;
use crate::error::SqlDaoError;
use crate::types::RowValues;

mod result_set;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use result_set::{BufferedCursor, ResultSet};

/// Name and driver-reported native type of a result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    pub name: String,
    /// Declared type as the driver reports it, e.g. `int4` or `VARCHAR(20)`.
    pub database_type_name: String,
    pub nullable: Option<bool>,
}

impl ColumnType {
    #[must_use]
    pub fn new(name: impl Into<String>, database_type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database_type_name: database_type_name.into(),
            nullable: None,
        }
    }
}

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecSummary {
    /// `None` when the driver cannot report affected rows.
    pub rows_affected: Option<u64>,
    /// `None` when the driver has no last-insert-id facility.
    pub last_insert_id: Option<i64>,
    /// Value bound to the output parameter of [`Driver::exec_with_output`].
    pub returned_id: Option<i64>,
}

impl ExecSummary {
    /// Affected rows with `-1` standing for "not reported".
    #[must_use]
    pub fn affected(&self) -> i64 {
        self.rows_affected
            .and_then(|n| i64::try_from(n).ok())
            .unwrap_or(-1)
    }
}

/// Destination of one column during [`Cursor::scan`].
///
/// [`RowValues`] is the generic holder; custom conversions may supply their own receiver and
/// downcast it back through [`Receiver::as_any_mut`].
pub trait Receiver: Send {
    /// Store the column value.
    ///
    /// # Errors
    /// Returns `SqlDaoError::ConversionError` when the value cannot be held.
    fn receive(&mut self, value: RowValues) -> Result<(), SqlDaoError>;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Receiver for RowValues {
    fn receive(&mut self, value: RowValues) -> Result<(), SqlDaoError> {
        *self = value;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Forward-only iteration over query results.
#[async_trait]
pub trait Cursor: Send {
    fn column_types(&self) -> &[ColumnType];

    /// Advance to the next row; `false` once exhausted.
    ///
    /// # Errors
    /// Returns driver errors raised while fetching.
    async fn next(&mut self) -> Result<bool, SqlDaoError>;

    /// Whether column `idx` of the current row is SQL NULL.
    ///
    /// # Errors
    /// Returns `SqlDaoError::InvalidUsage` with no current row or an out-of-range index.
    fn is_null(&self, idx: usize) -> Result<bool, SqlDaoError>;

    /// Hand every column of the current row to the receiver at the same position.
    ///
    /// # Errors
    /// Returns `SqlDaoError::InvalidUsage` when the receiver count differs from the column
    /// count, or the error of a failing receiver.
    fn scan(&mut self, receivers: &mut [Box<dyn Receiver>]) -> Result<(), SqlDaoError>;

    /// Release the cursor, discarding unread rows.
    ///
    /// # Errors
    /// Returns driver errors raised while closing.
    async fn close(&mut self) -> Result<(), SqlDaoError>;
}

/// An open driver transaction. Dropping it without commit or rollback rolls it back.
#[async_trait]
pub trait DriverTx: Send {
    async fn exec(&mut self, sql: &str, args: &[RowValues]) -> Result<ExecSummary, SqlDaoError>;

    /// Execute with a named output bind carrying a generated key back.
    async fn exec_with_output(
        &mut self,
        sql: &str,
        args: &[RowValues],
        out_name: &str,
    ) -> Result<ExecSummary, SqlDaoError> {
        let _ = (sql, args);
        Err(SqlDaoError::Unimplemented(format!(
            "output bind parameter '{out_name}' is not supported by this driver"
        )))
    }

    async fn query(
        &mut self,
        sql: &str,
        args: &[RowValues],
    ) -> Result<Box<dyn Cursor>, SqlDaoError>;

    async fn commit(self: Box<Self>) -> Result<(), SqlDaoError>;

    async fn rollback(self: Box<Self>) -> Result<(), SqlDaoError>;
}

/// A physical connection or pool.
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    async fn ping(&self) -> Result<(), SqlDaoError>;

    async fn begin(&self, options: Option<&TxOptions>) -> Result<Box<dyn DriverTx>, SqlDaoError>;

    async fn exec(&self, sql: &str, args: &[RowValues]) -> Result<ExecSummary, SqlDaoError>;

    async fn exec_with_output(
        &self,
        sql: &str,
        args: &[RowValues],
        out_name: &str,
    ) -> Result<ExecSummary, SqlDaoError> {
        let _ = (sql, args);
        Err(SqlDaoError::Unimplemented(format!(
            "output bind parameter '{out_name}' is not supported by driver {}",
            self.name()
        )))
    }

    async fn query(&self, sql: &str, args: &[RowValues]) -> Result<Box<dyn Cursor>, SqlDaoError>;

    async fn close(&self) -> Result<(), SqlDaoError> {
        Ok(())
    }
}

impl fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver").field("name", &self.name()).finish()
    }
}
