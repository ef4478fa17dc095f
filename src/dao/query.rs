use std::sync::Arc;

use super::fail;
use crate::context::ExecutionContext;
use crate::entity::RowTarget;
use crate::error::SqlDaoError;
use crate::handle::ConnectionHandle;
use crate::materialize::{RowMap, read_all, read_all_maps, read_one, read_one_map};
use crate::statement::{Page, Statement};
use crate::transaction::acquire;
use crate::translation::{count_plan, page_clause, rewrite_placeholders};
use crate::types::OperationKind;

/// First row of `stmt` as `T`; `None` when the query returns no rows.
///
/// A NULL single column still counts as a found row and yields `T::default()`.
///
/// # Errors
/// Returns `SqlDaoError::MultipleRows` (wrapped) when more than one row comes back, and any
/// acquisition, execution or conversion error.
pub async fn query_row<T: RowTarget>(
    ctx: &ExecutionContext,
    stmt: &Statement,
) -> Result<Option<T>, SqlDaoError> {
    async {
        let handle = acquire(ctx, OperationKind::Read).await?;
        let sql = rewrite_placeholders(handle.dialect(), stmt.sql());
        let mut cursor = handle.query(ctx, &sql, stmt.params()).await?;
        read_one(cursor.as_mut(), handle.conversions(), stmt).await
    }
    .await
    .map_err(|e| fail("query_row", e))
}

/// Every row of `stmt` as `T`, in result order.
///
/// With a `page`, only that page is fetched and, unless the statement opted out, the total row
/// count is stored in [`Page::total_count`].
///
/// # Errors
/// Returns acquisition, statement-build, execution and conversion errors.
pub async fn query<T: RowTarget>(
    ctx: &ExecutionContext,
    stmt: &Statement,
    page: Option<&mut Page>,
) -> Result<Vec<T>, SqlDaoError> {
    async {
        let handle = acquire(ctx, OperationKind::Read).await?;
        let sql = paged_sql(&handle, stmt, page.as_deref())?;
        let mut cursor = handle.query(ctx, &sql, stmt.params()).await?;
        let rows = read_all(cursor.as_mut(), handle.conversions(), stmt).await?;
        fill_total(ctx, &handle, stmt, page).await?;
        Ok(rows)
    }
    .await
    .map_err(|e| fail("query", e))
}

/// First row of `stmt` keyed by column name.
///
/// # Errors
/// Same as [`query_row`].
pub async fn query_row_map(
    ctx: &ExecutionContext,
    stmt: &Statement,
) -> Result<Option<RowMap>, SqlDaoError> {
    async {
        let handle = acquire(ctx, OperationKind::Read).await?;
        let sql = rewrite_placeholders(handle.dialect(), stmt.sql());
        let mut cursor = handle.query(ctx, &sql, stmt.params()).await?;
        read_one_map(cursor.as_mut(), handle.conversions(), stmt).await
    }
    .await
    .map_err(|e| fail("query_row_map", e))
}

/// Every row of `stmt` keyed by column name, paged like [`query`].
///
/// # Errors
/// Same as [`query`].
pub async fn query_map(
    ctx: &ExecutionContext,
    stmt: &Statement,
    page: Option<&mut Page>,
) -> Result<Vec<RowMap>, SqlDaoError> {
    async {
        let handle = acquire(ctx, OperationKind::Read).await?;
        let sql = paged_sql(&handle, stmt, page.as_deref())?;
        let mut cursor = handle.query(ctx, &sql, stmt.params()).await?;
        let rows = read_all_maps(cursor.as_mut(), handle.conversions(), stmt).await?;
        fill_total(ctx, &handle, stmt, page).await?;
        Ok(rows)
    }
    .await
    .map_err(|e| fail("query_map", e))
}

/// Number of rows `stmt` would return, using its own count statement when it has one.
///
/// # Errors
/// Returns `SqlDaoError::StatementError` (wrapped) when no count can be derived, and any
/// execution error.
pub async fn count(ctx: &ExecutionContext, stmt: &Statement) -> Result<u64, SqlDaoError> {
    async {
        let handle = acquire(ctx, OperationKind::Read).await?;
        count_rows(ctx, &handle, stmt).await
    }
    .await
    .map_err(|e| fail("count", e))
}

fn paged_sql(
    handle: &ConnectionHandle,
    stmt: &Statement,
    page: Option<&Page>,
) -> Result<String, SqlDaoError> {
    let dialect = handle.dialect();
    Ok(match page {
        Some(page) => {
            let paged = page_clause(dialect, stmt.sql(), page)?;
            rewrite_placeholders(dialect, &paged).into_owned()
        }
        None => rewrite_placeholders(dialect, stmt.sql()).into_owned(),
    })
}

async fn fill_total(
    ctx: &ExecutionContext,
    handle: &Arc<ConnectionHandle>,
    stmt: &Statement,
    page: Option<&mut Page>,
) -> Result<(), SqlDaoError> {
    if let Some(page) = page
        && stmt.wants_total_count()
    {
        page.total_count = Some(count_rows(ctx, handle, stmt).await?);
    }
    Ok(())
}

async fn count_rows(
    ctx: &ExecutionContext,
    handle: &Arc<ConnectionHandle>,
    stmt: &Statement,
) -> Result<u64, SqlDaoError> {
    let dialect = handle.dialect();
    let counting = match stmt.custom_count_statement() {
        Some(custom) => custom.clone(),
        None => count_plan(dialect, stmt)?,
    };
    let sql = rewrite_placeholders(dialect, counting.sql());
    let mut cursor = handle.query(ctx, &sql, counting.params()).await?;
    let total: Option<i64> = read_one(cursor.as_mut(), handle.conversions(), &counting).await?;
    Ok(total.and_then(|n| u64::try_from(n).ok()).unwrap_or(0))
}
