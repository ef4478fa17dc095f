//! Context-scoped transactions and connection acquisition.
//!
//! The first [`run_in_transaction`] in a call chain opens the transaction and is the only one
//! allowed to commit it. Nested calls that find a transaction already open join it: they never
//! begin or commit, but any failure inside them rolls the shared transaction back.
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::context::ExecutionContext;
use crate::datasource::select_data_source;
use crate::error::SqlDaoError;
use crate::handle::ConnectionHandle;
use crate::types::OperationKind;

/// Run `work` inside a transaction bound to the context it receives.
///
/// When `ctx` carries no connection, one is taken from the write data source and bound into
/// the child context passed to `work`. Errors returned by `work` roll the transaction back and
/// come back wrapped in [`SqlDaoError::TransactionAborted`]. A panic rolls back and then
/// resumes unwinding. A commit failure is returned even though `work` succeeded.
///
/// ```rust,no_run
/// use sql_dao::prelude::*;
///
/// # async fn demo(ctx: ExecutionContext) -> Result<(), SqlDaoError> {
/// let affected = run_in_transaction(&ctx, |ctx| async move {
///     update_statement(&ctx, &Statement::new("DELETE FROM t_log WHERE age > ?").param(30)).await
/// })
/// .await?;
/// # let _ = affected;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// Returns connection acquisition and begin errors, the wrapped error of `work`, or the
/// commit error.
pub async fn run_in_transaction<T, F, Fut>(ctx: &ExecutionContext, work: F) -> Result<T, SqlDaoError>
where
    F: FnOnce(ExecutionContext) -> Fut,
    Fut: Future<Output = Result<T, SqlDaoError>>,
{
    let (ctx, handle) = bind_or_reuse(ctx, OperationKind::Write)?;

    let opened_here = !handle.in_transaction().await;
    if opened_here {
        handle.begin(&ctx).await?;
    }
    let mut scope = TxScope::new(&handle, opened_here);

    match AssertUnwindSafe(work(ctx.clone())).catch_unwind().await {
        Err(panic) => {
            if let Err(rollback_err) = handle.rollback().await {
                tracing::error!(error = %rollback_err, "rollback after panic failed");
            }
            scope.disarm();
            std::panic::resume_unwind(panic)
        }
        Ok(Err(err)) => {
            let rollback_error = handle.rollback().await.err().map(Box::new);
            scope.disarm();
            if let Some(rollback_err) = &rollback_error {
                tracing::error!(error = %rollback_err, cause = %err, "rollback failed");
            }
            Err(SqlDaoError::TransactionAborted {
                source: Box::new(err),
                rollback_error,
            })
        }
        Ok(Ok(value)) => {
            scope.disarm();
            if opened_here {
                handle.commit(&ctx).await.inspect_err(|e| {
                    tracing::error!(error = %e, "commit failed");
                })?;
            }
            Ok(value)
        }
    }
}

/// Drops the open driver transaction if the opener's future is abandoned mid-flight; the
/// driver rolls back on drop.
struct TxScope<'a> {
    handle: &'a Arc<ConnectionHandle>,
    armed: bool,
}

impl<'a> TxScope<'a> {
    fn new(handle: &'a Arc<ConnectionHandle>, armed: bool) -> Self {
        Self { handle, armed }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TxScope<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.handle.tx.try_lock() {
            Ok(mut slot) => {
                if slot.take().is_some() {
                    tracing::warn!("transaction abandoned before completion, rolled back");
                }
            }
            Err(_) => tracing::error!("abandoned transaction is still in use and was not released"),
        }
    }
}

/// The context's handle, or a new default handle bound into a child context. Never opens a
/// transaction.
pub(crate) fn bind_or_reuse(
    ctx: &ExecutionContext,
    kind: OperationKind,
) -> Result<(ExecutionContext, Arc<ConnectionHandle>), SqlDaoError> {
    if let Some(handle) = ctx.handle() {
        ensure_usable(handle)?;
        return Ok((ctx.clone(), Arc::clone(handle)));
    }
    let handle = select_data_source(kind)?.new_handle();
    Ok((ctx.with_handle(Arc::clone(&handle)), handle))
}

/// Handle to run a statement on. Writes must find an open transaction.
pub(crate) async fn acquire(
    ctx: &ExecutionContext,
    kind: OperationKind,
) -> Result<Arc<ConnectionHandle>, SqlDaoError> {
    if let Some(handle) = ctx.handle() {
        ensure_usable(handle)?;
        if kind == OperationKind::Write && !handle.in_transaction().await {
            return Err(no_transaction());
        }
        return Ok(Arc::clone(handle));
    }
    if kind == OperationKind::Write {
        return Err(no_transaction());
    }
    Ok(select_data_source(kind)?.new_handle())
}

fn ensure_usable(handle: &ConnectionHandle) -> Result<(), SqlDaoError> {
    if handle.has_connection() {
        Ok(())
    } else {
        Err(SqlDaoError::InvalidUsage(
            "bound connection handle has no physical connection".into(),
        ))
    }
}

fn no_transaction() -> SqlDaoError {
    SqlDaoError::NoTransaction(
        "write operations must run inside run_in_transaction".into(),
    )
}
