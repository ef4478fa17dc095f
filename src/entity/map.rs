use std::collections::HashMap;

use super::DEFAULT_PK_COLUMN;
use super::descriptor::KeyStrategy;
use crate::error::SqlDaoError;
use crate::types::{Dialect, RowValues};

/// A row described at runtime: table, key and column values, with no Rust type behind it.
///
/// Column order is insertion order; setting an existing column (case-insensitive) replaces its
/// value in place.
///
/// ```rust
/// use sql_dao::prelude::*;
///
/// let row = EntityMap::new("t_user")
///     .with("id", 7)
///     .with("user_name", "alice");
/// assert_eq!(row.pk_value(), Some(&RowValues::Int(7)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMap {
    table: String,
    pk_column: String,
    sequences: HashMap<Dialect, String>,
    fields: Vec<(String, RowValues)>,
}

impl EntityMap {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            pk_column: DEFAULT_PK_COLUMN.to_string(),
            sequences: HashMap::new(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_pk_column(mut self, column: impl Into<String>) -> Self {
        self.pk_column = column.into();
        self
    }

    /// Key sequence expression for `dialect`; an empty expression marks a trigger-assigned key.
    #[must_use]
    pub fn with_sequence(mut self, dialect: Dialect, expression: impl Into<String>) -> Self {
        self.sequences.insert(dialect, expression.into());
        self
    }

    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<RowValues>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<RowValues>) -> &mut Self {
        let column = column.into();
        let value = value.into();
        match self
            .fields
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(&column))
        {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((column, value)),
        }
        self
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&RowValues> {
        self.fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn pk_column(&self) -> &str {
        &self.pk_column
    }

    #[must_use]
    pub fn fields(&self) -> &[(String, RowValues)] {
        &self.fields
    }

    #[must_use]
    pub fn pk_value(&self) -> Option<&RowValues> {
        self.get(&self.pk_column)
    }

    #[must_use]
    pub fn sequence(&self, dialect: Dialect) -> Option<&str> {
        self.sequences.get(&dialect).map(String::as_str)
    }

    #[must_use]
    pub fn key_strategy(&self, dialect: Dialect) -> KeyStrategy {
        KeyStrategy::resolve(
            self.sequence(dialect),
            self.pk_value().unwrap_or(&RowValues::Null),
        )
    }

    pub(crate) fn ensure_table(&self) -> Result<(), SqlDaoError> {
        if self.table.trim().is_empty() {
            return Err(SqlDaoError::InvalidUsage("entity map has no table name".into()));
        }
        Ok(())
    }

    /// The populated key value.
    pub(crate) fn required_pk(&self) -> Result<&RowValues, SqlDaoError> {
        match self.pk_value() {
            Some(value) if !value.is_zero() => Ok(value),
            _ => Err(SqlDaoError::InvalidUsage(format!(
                "entity map for {} has no value for primary key '{}'",
                self.table, self.pk_column
            ))),
        }
    }
}
