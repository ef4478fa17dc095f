//! Turning cursors into scalars, entities and column maps.
//!
//! Every reader consumes the cursor it is given and closes it, also on error.
use std::collections::HashMap;

use crate::convert::{ConversionRegistry, Destination, Slot};
use crate::driver::{ColumnType, Cursor, Receiver};
use crate::entity::{EntityDescriptor, RowTarget, TargetShape};
use crate::error::SqlDaoError;
use crate::statement::Statement;
use crate::types::{RowValues, parse_timestamp};

/// One row keyed by column name, with values typed from the declared column type.
pub type RowMap = HashMap<String, RowValues>;

/// What a query reads rows into.
enum Plan<T> {
    Scalar(fn(&mut T, RowValues) -> Result<(), SqlDaoError>),
    /// Field index for each column; `None` for columns the entity does not map.
    Record {
        descriptor: std::sync::Arc<EntityDescriptor<T>>,
        fields: Vec<Option<usize>>,
    },
}

impl<T: RowTarget> Plan<T> {
    fn for_columns(columns: &[ColumnType]) -> Result<Self, SqlDaoError> {
        match T::shape()? {
            TargetShape::Scalar(assign) => {
                if columns.len() != 1 {
                    return Err(SqlDaoError::InvalidUsage(format!(
                        "{} takes exactly one column but the query returns {}",
                        std::any::type_name::<T>(),
                        columns.len()
                    )));
                }
                Ok(Plan::Scalar(assign))
            }
            TargetShape::Record(descriptor) => {
                let fields = columns
                    .iter()
                    .map(|column| descriptor.column_index(&column.name))
                    .collect();
                Ok(Plan::Record { descriptor, fields })
            }
        }
    }
}

/// Reads rows of one cursor into `T`.
struct RowReader<'a, T> {
    plan: Plan<T>,
    columns: Vec<ColumnType>,
    registry: &'a ConversionRegistry,
    statement: &'a Statement,
}

impl<'a, T: RowTarget> RowReader<'a, T> {
    fn new(
        cursor: &dyn Cursor,
        registry: &'a ConversionRegistry,
        statement: &'a Statement,
    ) -> Result<Self, SqlDaoError> {
        let columns = cursor.column_types().to_vec();
        Ok(Self {
            plan: Plan::for_columns(&columns)?,
            columns,
            registry,
            statement,
        })
    }

    /// Materialize the current row. NULL columns leave the target's default in place.
    fn read(&self, cursor: &mut dyn Cursor) -> Result<T, SqlDaoError> {
        let mut target = T::default();
        match &self.plan {
            Plan::Scalar(assign) => {
                if cursor.is_null(0)? {
                    return Ok(target);
                }
                let column = &self.columns[0];
                let destination = Destination {
                    type_name: std::any::type_name::<T>(),
                    column: None,
                };
                let (receiver, slot) =
                    Slot::prepare(self.registry, column, Some(&destination), self.statement)?;
                let mut receivers = [receiver];
                cursor.scan(&mut receivers)?;
                let [receiver] = receivers;
                let value = slot.finish(receiver, column, Some(&destination), self.statement)?;
                if !value.is_null() {
                    assign(&mut target, value)?;
                }
            }
            Plan::Record { descriptor, fields } => {
                let mut receivers: Vec<Box<dyn Receiver>> = Vec::with_capacity(fields.len());
                let mut slots = Vec::with_capacity(fields.len());
                for (column, field) in self.columns.iter().zip(fields) {
                    match field {
                        Some(idx) => {
                            let mapped = &descriptor.columns()[*idx];
                            let destination = Destination {
                                type_name: mapped.type_name(&target),
                                column: Some(mapped.name()),
                            };
                            let (receiver, slot) = Slot::prepare(
                                self.registry,
                                column,
                                Some(&destination),
                                self.statement,
                            )?;
                            receivers.push(receiver);
                            slots.push(Some(slot));
                        }
                        None => {
                            receivers.push(Box::new(RowValues::Null));
                            slots.push(None);
                        }
                    }
                }
                cursor.scan(&mut receivers)?;

                for (((receiver, slot), column), field) in receivers
                    .into_iter()
                    .zip(slots)
                    .zip(&self.columns)
                    .zip(fields)
                {
                    let (Some(slot), Some(idx)) = (slot, field) else {
                        continue;
                    };
                    let mapped = &descriptor.columns()[*idx];
                    let destination = Destination {
                        type_name: mapped.type_name(&target),
                        column: Some(mapped.name()),
                    };
                    let value = slot.finish(receiver, column, Some(&destination), self.statement)?;
                    if !value.is_null() {
                        mapped.set(&mut target, value).map_err(|e| {
                            SqlDaoError::ConversionError(format!(
                                "column {} of {}: {e}",
                                column.name,
                                descriptor.table()
                            ))
                        })?;
                    }
                }
            }
        }
        Ok(target)
    }
}

/// Read the current row into a map, running custom conversions and typing values from the
/// declared column types.
fn read_map(
    cursor: &mut dyn Cursor,
    columns: &[ColumnType],
    registry: &ConversionRegistry,
    statement: &Statement,
) -> Result<RowMap, SqlDaoError> {
    let mut receivers = Vec::with_capacity(columns.len());
    let mut slots = Vec::with_capacity(columns.len());
    for column in columns {
        let (receiver, slot) = Slot::prepare(registry, column, None, statement)?;
        receivers.push(receiver);
        slots.push(slot);
    }
    cursor.scan(&mut receivers)?;

    let mut row = RowMap::with_capacity(columns.len());
    for ((receiver, slot), column) in receivers.into_iter().zip(slots).zip(columns) {
        let value = slot.finish(receiver, column, None, statement)?;
        row.insert(column.name.clone(), project_value(column, value));
    }
    Ok(row)
}

/// Normalise a driver value by the column's declared type.
pub(crate) fn project_value(column: &ColumnType, value: RowValues) -> RowValues {
    let declared = column.database_type_name.to_ascii_uppercase();
    let has = |needles: &[&str]| needles.iter().any(|n| declared.contains(n));

    let value = match value {
        RowValues::Blob(bytes) if has(&["CHAR", "TEXT", "CLOB", "JSON"]) => {
            match String::from_utf8(bytes) {
                Ok(text) => RowValues::Text(text),
                Err(e) => RowValues::Blob(e.into_bytes()),
            }
        }
        other => other,
    };

    match value {
        RowValues::Int(i) if has(&["BOOL"]) => RowValues::Bool(i != 0),
        RowValues::Text(text) => {
            let trimmed = text.trim();
            let parsed = if has(&["BOOL"]) {
                match trimmed.to_ascii_lowercase().as_str() {
                    "1" | "t" | "true" => Some(RowValues::Bool(true)),
                    "0" | "f" | "false" => Some(RowValues::Bool(false)),
                    _ => None,
                }
            } else if has(&["INT"]) && !has(&["INTERVAL"]) {
                trimmed.parse().ok().map(RowValues::Int)
            } else if has(&["DECIMAL", "NUMERIC", "NUMBER", "FLOAT", "DOUBLE", "REAL", "MONEY"]) {
                trimmed.parse().ok().map(RowValues::Float)
            } else if has(&["DATE", "TIME"]) {
                parse_timestamp(trimmed).map(RowValues::Timestamp)
            } else if has(&["JSON"]) {
                serde_json::from_str(trimmed).ok().map(RowValues::JSON)
            } else {
                None
            };
            parsed.unwrap_or(RowValues::Text(text))
        }
        other => other,
    }
}

/// Close the cursor whatever `outcome` is; the read error wins over the close error.
async fn finish_cursor<V>(
    cursor: &mut dyn Cursor,
    outcome: Result<V, SqlDaoError>,
) -> Result<V, SqlDaoError> {
    let closed = cursor.close().await;
    let value = outcome?;
    closed?;
    Ok(value)
}

async fn drain_extra_rows(cursor: &mut dyn Cursor) -> Result<SqlDaoError, SqlDaoError> {
    let mut extra = 1usize;
    while cursor.next().await? {
        extra += 1;
    }
    Ok(SqlDaoError::MultipleRows(format!(
        "single-row query returned {} rows",
        extra + 1
    )))
}

/// First row of the cursor, `None` when there is none; a second row is an error.
pub(crate) async fn read_one<T: RowTarget>(
    cursor: &mut dyn Cursor,
    registry: &ConversionRegistry,
    statement: &Statement,
) -> Result<Option<T>, SqlDaoError> {
    let outcome = async {
        let reader = RowReader::<T>::new(cursor, registry, statement)?;
        if !cursor.next().await? {
            return Ok(None);
        }
        let value = reader.read(cursor)?;
        if cursor.next().await? {
            return Err(drain_extra_rows(cursor).await?);
        }
        Ok(Some(value))
    }
    .await;
    finish_cursor(cursor, outcome).await
}

/// Every row of the cursor, in result order.
pub(crate) async fn read_all<T: RowTarget>(
    cursor: &mut dyn Cursor,
    registry: &ConversionRegistry,
    statement: &Statement,
) -> Result<Vec<T>, SqlDaoError> {
    let outcome = async {
        let reader = RowReader::<T>::new(cursor, registry, statement)?;
        let mut rows = Vec::new();
        while cursor.next().await? {
            rows.push(reader.read(cursor)?);
        }
        Ok(rows)
    }
    .await;
    finish_cursor(cursor, outcome).await
}

pub(crate) async fn read_one_map(
    cursor: &mut dyn Cursor,
    registry: &ConversionRegistry,
    statement: &Statement,
) -> Result<Option<RowMap>, SqlDaoError> {
    let outcome = async {
        let columns = cursor.column_types().to_vec();
        if !cursor.next().await? {
            return Ok(None);
        }
        let row = read_map(cursor, &columns, registry, statement)?;
        if cursor.next().await? {
            return Err(drain_extra_rows(cursor).await?);
        }
        Ok(Some(row))
    }
    .await;
    finish_cursor(cursor, outcome).await
}

pub(crate) async fn read_all_maps(
    cursor: &mut dyn Cursor,
    registry: &ConversionRegistry,
    statement: &Statement,
) -> Result<Vec<RowMap>, SqlDaoError> {
    let outcome = async {
        let columns = cursor.column_types().to_vec();
        let mut rows = Vec::new();
        while cursor.next().await? {
            rows.push(read_map(cursor, &columns, registry, statement)?);
        }
        Ok(rows)
    }
    .await;
    finish_cursor(cursor, outcome).await
}
