//! Convenient imports for common functionality.
//!
//! This module re-exports the types and operations most callers need, so a single
//! `use sql_dao::prelude::*;` covers the usual transaction, query and mapping code.

pub use crate::config::{DbConfig, IsolationLevel, PoolLimits, TxOptions};
pub use crate::context::ExecutionContext;
pub use crate::convert::{ConversionRegistry, CustomConversion, Destination};
pub use crate::dao::{
    count, delete, insert, insert_entity_map, insert_slice, query, query_map, query_row,
    query_row_map, update, update_entity_map, update_not_zero, update_statement,
};
pub use crate::datasource::{DataSource, ReadWriteStrategy};
pub use crate::driver::{ColumnType, Cursor, Driver, DriverTx, ExecSummary, Receiver, ResultSet};
pub use crate::entity::{Entity, EntityMap, KeyStrategy, RowTarget, describe};
pub use crate::error::SqlDaoError;
pub use crate::handle::ConnectionHandle;
pub use crate::materialize::RowMap;
pub use crate::statement::{Page, Statement};
pub use crate::transaction::run_in_transaction;
pub use crate::types::{Dialect, OperationKind, RowValues};
