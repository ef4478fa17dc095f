//! Mapping between Rust records and table rows.
//!
//! An [`Entity`] declares its table, primary key, per-dialect key sequences and the ordered
//! column/field pairs. [`describe`] turns that declaration into an immutable
//! [`EntityDescriptor`], built once per type and shared afterwards. Most types implement
//! [`Entity`] through the [`entity!`](crate::entity!) macro:
//!
//! ```rust
//! use sql_dao::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct User {
//!     id: i64,
//!     name: String,
//!     email: Option<String>,
//! }
//!
//! sql_dao::entity! {
//!     User => "t_user" {
//!         pk: "id",
//!         sequences: { Oracle => "SEQ_T_USER.NEXTVAL" },
//!         columns: {
//!             id => "id",
//!             name => "user_name",
//!             email => "email",
//!         }
//!     }
//! }
//!
//! let descriptor = describe::<User>()?;
//! assert_eq!(descriptor.table(), "t_user");
//! assert_eq!(descriptor.column_index("USER_NAME"), Some(1));
//! # Ok::<(), SqlDaoError>(())
//! ```
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;

use crate::error::SqlDaoError;
use crate::types::{Dialect, RowValues};

mod descriptor;
mod macros;
mod map;
mod value;

pub use descriptor::{EntityDescriptor, KeyStrategy, describe};
pub use map::EntityMap;
pub use value::{FromRowValue, ToRowValue};

/// Primary-key column used when an entity does not name one.
pub const DEFAULT_PK_COLUMN: &str = "id";

/// A record type mapped onto one table.
pub trait Entity: Default + Send + Sync + 'static {
    fn table_name() -> &'static str;

    fn pk_column() -> &'static str {
        DEFAULT_PK_COLUMN
    }

    /// Key sequence expression per dialect. An empty expression marks a trigger-assigned key.
    fn pk_sequences() -> &'static [(Dialect, &'static str)] {
        &[]
    }

    /// Mapped fields in declaration order. Fields left out are never read or written.
    fn columns() -> Vec<Column<Self>>;
}

/// Accessors for one mapped field.
pub struct Column<E> {
    name: &'static str,
    get: fn(&E) -> RowValues,
    set: fn(&mut E, RowValues) -> Result<(), SqlDaoError>,
    type_name: fn(&E) -> &'static str,
}

impl<E> Column<E> {
    #[must_use]
    pub fn new(
        name: &'static str,
        get: fn(&E) -> RowValues,
        set: fn(&mut E, RowValues) -> Result<(), SqlDaoError>,
        type_name: fn(&E) -> &'static str,
    ) -> Self {
        Self {
            name,
            get,
            set,
            type_name,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn get(&self, entity: &E) -> RowValues {
        (self.get)(entity)
    }

    /// # Errors
    /// Returns `SqlDaoError::ConversionError` when the value does not fit the field.
    pub fn set(&self, entity: &mut E, value: RowValues) -> Result<(), SqlDaoError> {
        (self.set)(entity, value)
    }

    /// Rust type name of the field.
    #[must_use]
    pub fn type_name(&self, entity: &E) -> &'static str {
        (self.type_name)(entity)
    }
}

impl<E> Clone for Column<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Column<E> {}

impl<E> fmt::Debug for Column<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column").field("name", &self.name).finish()
    }
}

/// How rows are written into a destination type.
pub enum TargetShape<T> {
    /// Single-column destination filled from the first column.
    Scalar(fn(&mut T, RowValues) -> Result<(), SqlDaoError>),
    /// Record destination filled field by field, columns matched by name.
    Record(Arc<EntityDescriptor<T>>),
}

/// Types query results can be materialized into: scalars and [`Entity`] records.
pub trait RowTarget: Default + Send + 'static {
    /// # Errors
    /// Returns `SqlDaoError::InvalidUsage` when the type cannot be described.
    fn shape() -> Result<TargetShape<Self>, SqlDaoError>;
}

/// Record shape of an entity; used by the [`entity!`](crate::entity!) expansion.
///
/// # Errors
/// Returns the descriptor build error.
pub fn record_shape<E: Entity>() -> Result<TargetShape<E>, SqlDaoError> {
    describe::<E>().map(TargetShape::Record)
}

fn assign<T: FromRowValue>(slot: &mut T, value: RowValues) -> Result<(), SqlDaoError> {
    *slot = T::from_row_value(value)?;
    Ok(())
}

macro_rules! scalar_targets {
    ($($t:ty),* $(,)?) => {$(
        impl RowTarget for $t {
            fn shape() -> Result<TargetShape<Self>, SqlDaoError> {
                Ok(TargetShape::Scalar(assign::<$t>))
            }
        }
    )*};
}

scalar_targets!(
    i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64, bool, String, NaiveDateTime,
    NaiveDate, JsonValue, Vec<u8>, RowValues,
);

impl<T: FromRowValue + Send + 'static> RowTarget for Option<T> {
    fn shape() -> Result<TargetShape<Self>, SqlDaoError> {
        Ok(TargetShape::Scalar(assign::<Option<T>>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Account {
        id: i64,
        owner: String,
        balance: Option<f64>,
        note: String,
    }

    crate::entity! {
        Account => "t_account" {
            columns: {
                id => "id",
                owner => "owner_name",
                balance => "balance",
            }
        }
    }

    #[test]
    fn macro_maps_only_declared_fields() -> Result<(), SqlDaoError> {
        let descriptor = describe::<Account>()?;
        let names: Vec<_> = descriptor.columns().iter().map(Column::name).collect();
        assert_eq!(names, ["id", "owner_name", "balance"]);
        assert_eq!(descriptor.pk_column(), DEFAULT_PK_COLUMN);
        assert_eq!(descriptor.pk_index(), Some(0));
        Ok(())
    }

    #[test]
    fn columns_read_and_write_fields() -> Result<(), SqlDaoError> {
        let descriptor = describe::<Account>()?;
        let mut account = Account::default();
        let balance = &descriptor.columns()[2];
        balance.set(&mut account, RowValues::Float(9.5))?;
        assert_eq!(account.balance, Some(9.5));
        assert_eq!(balance.get(&account), RowValues::Float(9.5));
        assert!(balance.type_name(&account).ends_with("Option<f64>"));
        assert!(descriptor.columns()[1].set(&mut account, RowValues::Null).is_err());
        assert_eq!(account.note, "");
        Ok(())
    }

    #[test]
    fn scalars_and_records_report_their_shape() -> Result<(), SqlDaoError> {
        assert!(matches!(i64::shape()?, TargetShape::Scalar(_)));
        assert!(matches!(Option::<String>::shape()?, TargetShape::Scalar(_)));
        assert!(matches!(Account::shape()?, TargetShape::Record(_)));
        Ok(())
    }
}
