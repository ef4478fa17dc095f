//! Public CRUD operations over an [`ExecutionContext`](crate::ExecutionContext).
//!
//! Reads run on the context's transaction when one is bound and on a plain connection from
//! the read data source otherwise. Writes must run inside
//! [`run_in_transaction`](crate::run_in_transaction). Every error is wrapped with the name of
//! the operation that raised it and logged once.
mod query;
mod sql_build;
mod write;

pub use query::{count, query, query_map, query_row, query_row_map};
pub use write::{
    delete, insert, insert_entity_map, insert_slice, update, update_entity_map, update_not_zero,
    update_statement,
};

use crate::error::SqlDaoError;

fn fail(operation: &'static str, err: SqlDaoError) -> SqlDaoError {
    if err.is_cancelled() {
        tracing::debug!(operation, error = %err, "operation interrupted");
    } else {
        tracing::error!(operation, error = %err, "operation failed");
    }
    err.in_operation(operation)
}
