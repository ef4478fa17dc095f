//! Dialect-aware SQL text transforms: placeholder rewriting, key read-back fragments,
//! count statements and page clauses.
use std::borrow::Cow;
use std::fmt::Write as _;

mod count;
mod page;
mod parsers;
mod scanner;

pub use count::{count_plan, count_statement};
pub use page::page_clause;

use crate::error::SqlDaoError;
use crate::types::Dialect;
use scanner::for_each_code_byte;

/// Name of the output bind variable carrying an Oracle `RETURNING ... INTO` key.
pub const RETURNING_OUT_PARAM: &str = "sql_dao_returning_id";

/// Rewrite `?` placeholders into the native style of `dialect`.
///
/// MySQL and `SQLite` accept `?` as-is. PostgreSQL gets `$1, $2, ...`, SQL Server `@p1, @p2, ...`
/// and Oracle `:1, :2, ...`. A `?` inside a string literal, quoted identifier or comment is
/// left alone:
/// ```rust
/// use sql_dao::prelude::*;
/// use sql_dao::translation::rewrite_placeholders;
///
/// let sql = rewrite_placeholders(Dialect::Postgres, "SELECT '?' FROM t WHERE a = ? AND b = ?");
/// assert_eq!(sql, "SELECT '?' FROM t WHERE a = $1 AND b = $2");
/// ```
/// Text that already uses native placeholders contains no bare `?`, so rewriting it again
/// returns it unchanged. Returns a borrowed `Cow` when nothing was rewritten.
#[must_use]
pub fn rewrite_placeholders(dialect: Dialect, sql: &str) -> Cow<'_, str> {
    let prefix = match dialect {
        Dialect::Mysql | Dialect::Sqlite => return Cow::Borrowed(sql),
        Dialect::Postgres => "$",
        Dialect::Mssql => "@p",
        Dialect::Oracle => ":",
    };

    let mut out: Option<String> = None;
    let mut copied = 0;
    let mut ordinal = 0usize;
    for_each_code_byte(sql, dialect, |idx, b| {
        if b != b'?' {
            return;
        }
        ordinal += 1;
        let buf = out.get_or_insert_with(|| String::with_capacity(sql.len() + 16));
        buf.push_str(&sql[copied..idx]);
        let _ = write!(buf, "{prefix}{ordinal}");
        copied = idx + 1;
    });

    match out {
        Some(mut buf) => {
            buf.push_str(&sql[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(sql),
    }
}

/// [`rewrite_placeholders`] keyed by a dialect or driver family name.
///
/// # Errors
/// Returns `SqlDaoError::StatementError` when the name is not a known dialect.
pub fn rewrite_placeholders_for<'a>(
    dialect_name: &str,
    sql: &'a str,
) -> Result<Cow<'a, str>, SqlDaoError> {
    let dialect: Dialect = dialect_name.parse()?;
    Ok(rewrite_placeholders(dialect, sql))
}

/// Number of `?` placeholders outside literals and comments.
#[must_use]
pub fn count_placeholders(dialect: Dialect, sql: &str) -> usize {
    let mut count = 0;
    for_each_code_byte(sql, dialect, |_, b| {
        if b == b'?' {
            count += 1;
        }
    });
    count
}

/// How a server-assigned key comes back after an INSERT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyReadback {
    /// Append the fragment and run the insert as a query returning the key.
    ReturningRow(String),
    /// Append the fragment and bind the named output parameter.
    OutParam { fragment: String, name: &'static str },
    /// Ask the driver for its last insert id after executing.
    LastInsertId,
}

/// Read-back strategy for an auto-assigned key column on `dialect`.
#[must_use]
pub fn key_readback(dialect: Dialect, pk_column: &str) -> KeyReadback {
    match dialect {
        Dialect::Postgres => KeyReadback::ReturningRow(format!(" RETURNING {pk_column}")),
        Dialect::Oracle => KeyReadback::OutParam {
            fragment: format!(" RETURNING {pk_column} INTO :{RETURNING_OUT_PARAM}"),
            name: RETURNING_OUT_PARAM,
        },
        Dialect::Mysql | Dialect::Sqlite | Dialect::Mssql => KeyReadback::LastInsertId,
    }
}
