/// Implement [`Entity`](crate::entity::Entity) and [`RowTarget`](crate::entity::RowTarget)
/// for a struct with a `Default` impl.
///
/// `pk` defaults to `"id"`; `sequences` maps [`Dialect`](crate::Dialect) variants to key
/// sequence expressions, an empty string marking a trigger-assigned key. Only the fields listed
/// under `columns` are mapped.
#[macro_export]
macro_rules! entity {
    (
        $ty:ty => $table:literal {
            $(pk: $pk:literal,)?
            $(sequences: { $($dialect:ident => $seq:literal),* $(,)? },)?
            columns: { $($field:ident => $column:literal),+ $(,)? } $(,)?
        }
    ) => {
        impl $crate::entity::Entity for $ty {
            fn table_name() -> &'static str {
                $table
            }

            fn pk_column() -> &'static str {
                $crate::__entity_pk!($($pk)?)
            }

            fn pk_sequences() -> &'static [($crate::Dialect, &'static str)] {
                &[$($(($crate::Dialect::$dialect, $seq)),*)?]
            }

            fn columns() -> ::std::vec::Vec<$crate::entity::Column<Self>> {
                $crate::entity_columns!($ty { $($field => $column),+ })
            }
        }

        impl $crate::entity::RowTarget for $ty {
            fn shape() -> ::std::result::Result<
                $crate::entity::TargetShape<Self>,
                $crate::SqlDaoError,
            > {
                $crate::entity::record_shape::<Self>()
            }
        }
    };
}

/// Column list for a hand-written [`Entity::columns`](crate::entity::Entity::columns).
#[macro_export]
macro_rules! entity_columns {
    ($ty:ty { $($field:ident => $column:literal),+ $(,)? }) => {
        ::std::vec![$(
            $crate::entity::Column::<$ty>::new(
                $column,
                |e: &$ty| $crate::entity::ToRowValue::to_row_value(&e.$field),
                |e: &mut $ty, value: $crate::RowValues| {
                    e.$field = $crate::entity::FromRowValue::from_row_value(value)?;
                    ::std::result::Result::Ok(())
                },
                |e: &$ty| ::std::any::type_name_of_val(&e.$field),
            )
        ),+]
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __entity_pk {
    () => {
        $crate::entity::DEFAULT_PK_COLUMN
    };
    ($pk:literal) => {
        $pk
    };
}
