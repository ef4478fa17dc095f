use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::error::SqlDaoError;

/// Values that can be stored in a database row or used as statement parameters.
///
/// Every driver converts its native values into this enum, so mapping code never branches on
/// driver types:
/// ```rust
/// use sql_dao::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    #[default]
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this value equals the zero value of its kind.
    ///
    /// NULL counts as zero, so optional fields left unset are skipped by not-zero updates.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        match self {
            RowValues::Int(v) => *v == 0,
            RowValues::Float(v) => *v == 0.0,
            RowValues::Text(v) => v.is_empty(),
            RowValues::Bool(v) => !*v,
            RowValues::Timestamp(v) => *v == NaiveDateTime::default(),
            RowValues::Null => true,
            RowValues::JSON(v) => v.is_null(),
            RowValues::Blob(v) => v.is_empty(),
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let RowValues::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let RowValues::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            return parse_timestamp(s);
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValues::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Short name of the variant, used in conversion error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            RowValues::Int(_) => "integer",
            RowValues::Float(_) => "float",
            RowValues::Text(_) => "text",
            RowValues::Bool(_) => "bool",
            RowValues::Timestamp(_) => "timestamp",
            RowValues::Null => "null",
            RowValues::JSON(_) => "json",
            RowValues::Blob(_) => "blob",
        }
    }
}

/// Parse the textual timestamp layouts drivers commonly hand back.
pub(crate) fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    const LAYOUTS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    for layout in LAYOUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(dt);
        }
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// SQL dialect families the rewriter understands.
///
/// Parsing accepts the driver family names used by compatible databases, e.g. `kingbase`
/// parses as [`Dialect::Postgres`] and `dm` as [`Dialect::Oracle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Dialect {
    /// `MySQL` and wire-compatible servers
    #[value(alias = "mariadb", alias = "tidb")]
    Mysql,
    /// `SQLite`
    #[value(alias = "sqlite3")]
    Sqlite,
    /// `PostgreSQL` and derivatives
    #[value(alias = "postgresql", alias = "pgx", alias = "kingbase", alias = "opengauss")]
    Postgres,
    /// SQL Server
    #[value(alias = "sqlserver")]
    Mssql,
    /// Oracle and derivatives
    #[value(alias = "dm", alias = "shentong")]
    Oracle,
}

impl Dialect {
    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Mysql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Mssql => "mssql",
            Dialect::Oracle => "oracle",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = SqlDaoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Dialect as ValueEnum>::from_str(s.trim(), true)
            .map_err(|_| SqlDaoError::StatementError(format!("unknown dialect '{s}'")))
    }
}

impl Serialize for Dialect {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Dialect {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Whether an operation reads or writes; drives data source selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_family_names_parse() {
        assert_eq!("postgresql".parse::<Dialect>().ok(), Some(Dialect::Postgres));
        assert_eq!("Kingbase".parse::<Dialect>().ok(), Some(Dialect::Postgres));
        assert_eq!("sqlserver".parse::<Dialect>().ok(), Some(Dialect::Mssql));
        assert_eq!("dm".parse::<Dialect>().ok(), Some(Dialect::Oracle));
        assert_eq!("sqlite3".parse::<Dialect>().ok(), Some(Dialect::Sqlite));
        assert!("informix".parse::<Dialect>().is_err());
    }

    #[test]
    fn zero_detection_matches_defaults() {
        assert!(RowValues::Int(0).is_zero());
        assert!(RowValues::Text(String::new()).is_zero());
        assert!(RowValues::Null.is_zero());
        assert!(!RowValues::Bool(true).is_zero());
        assert!(!RowValues::Float(0.5).is_zero());
    }

    #[test]
    fn timestamps_parse_from_common_layouts() {
        let v = RowValues::Text("2024-03-01 10:11:12".into());
        assert!(v.as_timestamp().is_some());
        let v = RowValues::Text("2024-03-01".into());
        assert!(v.as_timestamp().is_some());
        let v = RowValues::Text("not a date".into());
        assert!(v.as_timestamp().is_none());
    }
}
