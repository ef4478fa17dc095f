use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;

use crate::error::SqlDaoError;
use crate::types::RowValues;

/// Field types that can be written as a statement parameter.
pub trait ToRowValue {
    fn to_row_value(&self) -> RowValues;
}

/// Field types that can be filled from a column value.
///
/// Conversions are lenient across representations drivers commonly mix up (integers stored
/// as text, booleans stored as integers); anything else is a [`SqlDaoError::ConversionError`].
pub trait FromRowValue: Sized {
    /// # Errors
    /// Returns `SqlDaoError::ConversionError` when `value` cannot represent `Self`.
    fn from_row_value(value: RowValues) -> Result<Self, SqlDaoError>;
}

fn mismatch(target: &str, value: &RowValues) -> SqlDaoError {
    SqlDaoError::ConversionError(format!(
        "cannot convert {} value {value:?} into {target}",
        value.kind_name()
    ))
}

fn integer(value: &RowValues, target: &str) -> Result<i64, SqlDaoError> {
    match value {
        RowValues::Int(v) => Ok(*v),
        RowValues::Bool(b) => Ok(i64::from(*b)),
        #[allow(clippy::cast_possible_truncation)]
        RowValues::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
        RowValues::Text(s) => s.trim().parse().map_err(|_| mismatch(target, value)),
        _ => Err(mismatch(target, value)),
    }
}

macro_rules! widening_ints {
    ($($t:ty),*) => {$(
        impl ToRowValue for $t {
            fn to_row_value(&self) -> RowValues {
                RowValues::Int(i64::from(*self))
            }
        }
    )*};
}

macro_rules! narrowing_ints {
    ($($t:ty),*) => {$(
        impl FromRowValue for $t {
            fn from_row_value(value: RowValues) -> Result<Self, SqlDaoError> {
                let wide = integer(&value, stringify!($t))?;
                <$t>::try_from(wide).map_err(|_| {
                    SqlDaoError::ConversionError(format!(
                        "{wide} is out of range for {}",
                        stringify!($t)
                    ))
                })
            }
        }
    )*};
}

widening_ints!(i8, i16, i32, i64, u8, u16, u32);
narrowing_ints!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl ToRowValue for u64 {
    fn to_row_value(&self) -> RowValues {
        i64::try_from(*self).map_or_else(|_| RowValues::Text(self.to_string()), RowValues::Int)
    }
}

impl ToRowValue for usize {
    fn to_row_value(&self) -> RowValues {
        i64::try_from(*self).map_or_else(|_| RowValues::Text(self.to_string()), RowValues::Int)
    }
}

impl ToRowValue for isize {
    fn to_row_value(&self) -> RowValues {
        i64::try_from(*self).map_or_else(|_| RowValues::Text(self.to_string()), RowValues::Int)
    }
}

impl ToRowValue for f64 {
    fn to_row_value(&self) -> RowValues {
        RowValues::Float(*self)
    }
}

impl FromRowValue for f64 {
    fn from_row_value(value: RowValues) -> Result<Self, SqlDaoError> {
        match value {
            RowValues::Float(f) => Ok(f),
            #[allow(clippy::cast_precision_loss)]
            RowValues::Int(i) => Ok(i as f64),
            RowValues::Text(ref s) => s.trim().parse().map_err(|_| mismatch("f64", &value)),
            other => Err(mismatch("f64", &other)),
        }
    }
}

impl ToRowValue for f32 {
    fn to_row_value(&self) -> RowValues {
        RowValues::Float(f64::from(*self))
    }
}

impl FromRowValue for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn from_row_value(value: RowValues) -> Result<Self, SqlDaoError> {
        f64::from_row_value(value).map(|f| f as f32)
    }
}

impl ToRowValue for bool {
    fn to_row_value(&self) -> RowValues {
        RowValues::Bool(*self)
    }
}

impl FromRowValue for bool {
    fn from_row_value(value: RowValues) -> Result<Self, SqlDaoError> {
        match value {
            RowValues::Bool(b) => Ok(b),
            RowValues::Int(i) => Ok(i != 0),
            RowValues::Text(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "t" | "true" | "y" | "yes" => Ok(true),
                "0" | "f" | "false" | "n" | "no" => Ok(false),
                _ => Err(mismatch("bool", &value)),
            },
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl ToRowValue for String {
    fn to_row_value(&self) -> RowValues {
        RowValues::Text(self.clone())
    }
}

impl FromRowValue for String {
    fn from_row_value(value: RowValues) -> Result<Self, SqlDaoError> {
        match value {
            RowValues::Text(s) => Ok(s),
            RowValues::Int(i) => Ok(i.to_string()),
            RowValues::Float(f) => Ok(f.to_string()),
            RowValues::Bool(b) => Ok(b.to_string()),
            RowValues::Timestamp(ts) => Ok(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            RowValues::JSON(json) => Ok(json.to_string()),
            RowValues::Blob(bytes) => String::from_utf8(bytes)
                .map_err(|e| SqlDaoError::ConversionError(format!("blob is not UTF-8: {e}"))),
            RowValues::Null => Err(mismatch("String", &RowValues::Null)),
        }
    }
}

impl ToRowValue for &str {
    fn to_row_value(&self) -> RowValues {
        RowValues::Text((*self).to_string())
    }
}

impl ToRowValue for NaiveDateTime {
    fn to_row_value(&self) -> RowValues {
        RowValues::Timestamp(*self)
    }
}

impl FromRowValue for NaiveDateTime {
    fn from_row_value(value: RowValues) -> Result<Self, SqlDaoError> {
        value
            .as_timestamp()
            .ok_or_else(|| mismatch("NaiveDateTime", &value))
    }
}

impl ToRowValue for NaiveDate {
    fn to_row_value(&self) -> RowValues {
        self.and_hms_opt(0, 0, 0)
            .map_or(RowValues::Null, RowValues::Timestamp)
    }
}

impl FromRowValue for NaiveDate {
    fn from_row_value(value: RowValues) -> Result<Self, SqlDaoError> {
        value
            .as_timestamp()
            .map(|ts| ts.date())
            .ok_or_else(|| mismatch("NaiveDate", &value))
    }
}

impl ToRowValue for JsonValue {
    fn to_row_value(&self) -> RowValues {
        RowValues::JSON(self.clone())
    }
}

impl FromRowValue for JsonValue {
    fn from_row_value(value: RowValues) -> Result<Self, SqlDaoError> {
        match value {
            RowValues::JSON(json) => Ok(json),
            RowValues::Text(ref s) => {
                serde_json::from_str(s).map_err(|_| mismatch("serde_json::Value", &value))
            }
            other => Err(mismatch("serde_json::Value", &other)),
        }
    }
}

impl ToRowValue for Vec<u8> {
    fn to_row_value(&self) -> RowValues {
        RowValues::Blob(self.clone())
    }
}

impl FromRowValue for Vec<u8> {
    fn from_row_value(value: RowValues) -> Result<Self, SqlDaoError> {
        match value {
            RowValues::Blob(bytes) => Ok(bytes),
            RowValues::Text(s) => Ok(s.into_bytes()),
            other => Err(mismatch("Vec<u8>", &other)),
        }
    }
}

impl ToRowValue for RowValues {
    fn to_row_value(&self) -> RowValues {
        self.clone()
    }
}

impl FromRowValue for RowValues {
    fn from_row_value(value: RowValues) -> Result<Self, SqlDaoError> {
        Ok(value)
    }
}

impl<T: ToRowValue> ToRowValue for Option<T> {
    fn to_row_value(&self) -> RowValues {
        self.as_ref().map_or(RowValues::Null, ToRowValue::to_row_value)
    }
}

impl<T: FromRowValue> FromRowValue for Option<T> {
    fn from_row_value(value: RowValues) -> Result<Self, SqlDaoError> {
        match value {
            RowValues::Null => Ok(None),
            other => T::from_row_value(other).map(Some),
        }
    }
}

macro_rules! into_row_values {
    ($($t:ty),*) => {$(
        impl From<$t> for RowValues {
            fn from(value: $t) -> Self {
                value.to_row_value()
            }
        }
    )*};
}

into_row_values!(
    i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64, bool, String, &str,
    NaiveDateTime, NaiveDate, JsonValue, Vec<u8>
);

impl<T: ToRowValue> From<Option<T>> for RowValues {
    fn from(value: Option<T>) -> Self {
        value.to_row_value()
    }
}
