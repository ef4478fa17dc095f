use super::fail;
use super::sql_build::{InsertRow, delete_sql, insert_batch_sql, insert_sql, update_sql};
use crate::context::ExecutionContext;
use crate::entity::{Entity, EntityDescriptor, EntityMap, KeyStrategy, describe};
use crate::error::SqlDaoError;
use crate::handle::ConnectionHandle;
use crate::materialize::read_one;
use crate::statement::{Statement, StatementPlan};
use crate::transaction::acquire;
use crate::translation::{KeyReadback, key_readback, rewrite_placeholders};
use crate::types::{OperationKind, RowValues};

/// Insert `entity` and store a generated key back into it.
///
/// Auto-increment, sequence and trigger keys are read back per dialect: PostgreSQL appends
/// `RETURNING pk`, Oracle binds `RETURNING pk INTO` an output parameter and the others ask the
/// driver for its last insert id. A driver without that facility still reports the insert as
/// successful and leaves the key unset.
///
/// Returns the affected row count, `-1` when the driver does not report one.
///
/// # Errors
/// Returns `SqlDaoError::NoTransaction` (wrapped) outside a transaction, and any
/// statement-build, execution or conversion error.
pub async fn insert<E: Entity>(ctx: &ExecutionContext, entity: &mut E) -> Result<i64, SqlDaoError> {
    async {
        let descriptor = describe::<E>()?;
        let handle = acquire(ctx, OperationKind::Write).await?;
        let strategy = match descriptor.pk_index() {
            Some(_) => descriptor.key_strategy(handle.dialect(), entity)?,
            None => KeyStrategy::Assigned,
        };
        let row = InsertRow::build(fields_of(&descriptor, entity), descriptor.pk_column(), &strategy);
        let plan = insert_sql(descriptor.table(), row)?;
        let (affected, key) =
            execute_insert(ctx, &handle, plan, descriptor.pk_column(), strategy.reads_back()).await?;
        if let Some(key) = key {
            descriptor.pk()?.set(entity, RowValues::Int(key))?;
        }
        Ok(affected)
    }
    .await
    .map_err(|e| fail("insert", e))
}

/// Insert every entity with one multi-row statement. Generated keys are not read back.
///
/// # Errors
/// Returns `SqlDaoError::InvalidUsage` (wrapped) for an empty slice, and the errors of
/// [`insert`].
pub async fn insert_slice<E: Entity>(
    ctx: &ExecutionContext,
    entities: &[E],
) -> Result<i64, SqlDaoError> {
    async {
        if entities.is_empty() {
            return Err(SqlDaoError::InvalidUsage("insert_slice needs at least one entity".into()));
        }
        let descriptor = describe::<E>()?;
        let handle = acquire(ctx, OperationKind::Write).await?;
        let dialect = handle.dialect();
        let strategy = match descriptor.pk_index() {
            Some(_) => descriptor.key_strategy(dialect, &entities[0])?,
            None => KeyStrategy::Assigned,
        };
        let rows = entities
            .iter()
            .map(|entity| {
                InsertRow::build(fields_of(&descriptor, entity), descriptor.pk_column(), &strategy)
            })
            .collect();
        let plan = insert_batch_sql(dialect, descriptor.table(), rows)?;
        let sql = plan.native_sql(dialect);
        Ok(handle.exec(ctx, &sql, &plan.params).await?.affected())
    }
    .await
    .map_err(|e| fail("insert_slice", e))
}

/// Update every mapped column of `entity` by primary key.
///
/// # Errors
/// Returns `SqlDaoError::InvalidUsage` (wrapped) when the key is unmapped or zero, and the
/// errors of [`insert`].
pub async fn update<E: Entity>(ctx: &ExecutionContext, entity: &E) -> Result<i64, SqlDaoError> {
    update_entity(ctx, entity, false)
        .await
        .map_err(|e| fail("update", e))
}

/// Update only the columns of `entity` whose values are not zero values, by primary key.
///
/// # Errors
/// Same as [`update`], plus `SqlDaoError::StatementError` (wrapped) when every non-key column
/// is zero.
pub async fn update_not_zero<E: Entity>(
    ctx: &ExecutionContext,
    entity: &E,
) -> Result<i64, SqlDaoError> {
    update_entity(ctx, entity, true)
        .await
        .map_err(|e| fail("update_not_zero", e))
}

/// Delete the row of `entity` by primary key.
///
/// # Errors
/// Same as [`update`].
pub async fn delete<E: Entity>(ctx: &ExecutionContext, entity: &E) -> Result<i64, SqlDaoError> {
    async {
        let descriptor = describe::<E>()?;
        let key = required_key(&descriptor, entity)?;
        let handle = acquire(ctx, OperationKind::Write).await?;
        let plan = delete_sql(descriptor.table(), descriptor.pk_column(), key);
        execute(ctx, &handle, &plan).await
    }
    .await
    .map_err(|e| fail("delete", e))
}

/// Insert a runtime-described row. A generated key is written back into the map.
///
/// # Errors
/// Same as [`insert`].
pub async fn insert_entity_map(
    ctx: &ExecutionContext,
    entity: &mut EntityMap,
) -> Result<i64, SqlDaoError> {
    async {
        entity.ensure_table()?;
        let handle = acquire(ctx, OperationKind::Write).await?;
        let strategy = entity.key_strategy(handle.dialect());
        let fields = entity
            .fields()
            .iter()
            .map(|(column, value)| (column.as_str(), value.clone()));
        let row = InsertRow::build(fields, entity.pk_column(), &strategy);
        let plan = insert_sql(entity.table(), row)?;
        let pk_column = entity.pk_column().to_string();
        let (affected, key) =
            execute_insert(ctx, &handle, plan, &pk_column, strategy.reads_back()).await?;
        if let Some(key) = key {
            entity.set(pk_column, key);
        }
        Ok(affected)
    }
    .await
    .map_err(|e| fail("insert_entity_map", e))
}

/// Update every non-key column of a runtime-described row by its primary-key entry.
///
/// # Errors
/// Returns `SqlDaoError::InvalidUsage` (wrapped) when the key entry is missing or zero.
pub async fn update_entity_map(
    ctx: &ExecutionContext,
    entity: &EntityMap,
) -> Result<i64, SqlDaoError> {
    async {
        entity.ensure_table()?;
        let key = entity.required_pk()?.clone();
        let handle = acquire(ctx, OperationKind::Write).await?;
        let fields = entity
            .fields()
            .iter()
            .map(|(column, value)| (column.as_str(), value.clone()));
        let plan = update_sql(entity.table(), entity.pk_column(), key, fields)?;
        execute(ctx, &handle, &plan).await
    }
    .await
    .map_err(|e| fail("update_entity_map", e))
}

/// Run arbitrary DML inside the current transaction.
///
/// # Errors
/// Returns `SqlDaoError::NoTransaction` (wrapped) outside a transaction, and any execution
/// error.
pub async fn update_statement(ctx: &ExecutionContext, stmt: &Statement) -> Result<i64, SqlDaoError> {
    async {
        let handle = acquire(ctx, OperationKind::Write).await?;
        let sql = rewrite_placeholders(handle.dialect(), stmt.sql());
        Ok(handle.exec(ctx, &sql, stmt.params()).await?.affected())
    }
    .await
    .map_err(|e| fail("update_statement", e))
}

async fn update_entity<E: Entity>(
    ctx: &ExecutionContext,
    entity: &E,
    skip_zero: bool,
) -> Result<i64, SqlDaoError> {
    let descriptor = describe::<E>()?;
    let key = required_key(&descriptor, entity)?;
    let handle = acquire(ctx, OperationKind::Write).await?;
    let fields = fields_of(&descriptor, entity).filter(|(_, value)| !(skip_zero && value.is_zero()));
    let plan = update_sql(descriptor.table(), descriptor.pk_column(), key, fields)?;
    execute(ctx, &handle, &plan).await
}

fn fields_of<'a, E>(
    descriptor: &'a EntityDescriptor<E>,
    entity: &'a E,
) -> impl Iterator<Item = (&'static str, RowValues)> + 'a {
    descriptor
        .columns()
        .iter()
        .map(move |column| (column.name(), column.get(entity)))
}

fn required_key<E>(descriptor: &EntityDescriptor<E>, entity: &E) -> Result<RowValues, SqlDaoError> {
    let key = descriptor.pk()?.get(entity);
    if key.is_zero() {
        return Err(SqlDaoError::InvalidUsage(format!(
            "{} needs a populated primary key '{}'",
            descriptor.table(),
            descriptor.pk_column()
        )));
    }
    Ok(key)
}

async fn execute(
    ctx: &ExecutionContext,
    handle: &ConnectionHandle,
    plan: &StatementPlan,
) -> Result<i64, SqlDaoError> {
    let sql = plan.native_sql(handle.dialect());
    Ok(handle.exec(ctx, &sql, &plan.params).await?.affected())
}

/// Run an insert, reading a generated key back when `read_back` is set.
async fn execute_insert(
    ctx: &ExecutionContext,
    handle: &ConnectionHandle,
    plan: StatementPlan,
    pk_column: &str,
    read_back: bool,
) -> Result<(i64, Option<i64>), SqlDaoError> {
    let dialect = handle.dialect();
    let sql = plan.native_sql(dialect).into_owned();
    if !read_back {
        let summary = handle.exec(ctx, &sql, &plan.params).await?;
        return Ok((summary.affected(), None));
    }

    match key_readback(dialect, pk_column) {
        KeyReadback::ReturningRow(fragment) => {
            let returning = Statement::with_params(sql + &fragment, plan.params);
            let mut cursor = handle
                .query(ctx, returning.sql(), returning.params())
                .await?;
            // a returned row with a NULL key counts as inserted but leaves the key unset
            let row: Option<Option<i64>> =
                read_one(cursor.as_mut(), handle.conversions(), &returning).await?;
            if matches!(row, Some(None)) {
                tracing::warn!(%dialect, pk_column, "insert returned a NULL key; key left unset");
            }
            Ok((i64::from(row.is_some()), row.flatten()))
        }
        KeyReadback::OutParam { fragment, name } => {
            let summary = handle
                .exec_with_output(ctx, &(sql + &fragment), &plan.params, name)
                .await?;
            if summary.returned_id.is_none() {
                tracing::warn!(%dialect, pk_column, "insert succeeded but no key was bound to the output parameter");
            }
            Ok((summary.affected(), summary.returned_id))
        }
        KeyReadback::LastInsertId => {
            let summary = handle.exec(ctx, &sql, &plan.params).await?;
            if summary.last_insert_id.is_none() {
                tracing::warn!(%dialect, pk_column, "driver reports no last insert id; key left unset");
            }
            Ok((summary.affected(), summary.last_insert_id))
        }
    }
}
