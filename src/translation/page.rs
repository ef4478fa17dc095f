use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::error::SqlDaoError;
use crate::statement::Page;
use crate::types::Dialect;

use super::scanner::for_each_code_byte;

static TOP_LEVEL_ORDER_BY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i-u)\border\s+by\b").expect("static order by pattern")
});

/// Append the dialect's row-window clause for `page` to `sql`.
///
/// # Errors
/// Returns `SqlDaoError::StatementError` for a zero page size.
pub fn page_clause(dialect: Dialect, sql: &str, page: &Page) -> Result<String, SqlDaoError> {
    if page.page_size == 0 {
        return Err(SqlDaoError::StatementError(
            "page size must be greater than zero".into(),
        ));
    }
    let sql = sql.trim_end().trim_end_matches(';');
    let (offset, size) = (page.offset(), page.page_size);
    Ok(match dialect {
        Dialect::Mysql | Dialect::Sqlite | Dialect::Postgres => {
            format!("{sql} LIMIT {size} OFFSET {offset}")
        }
        Dialect::Mssql if !has_top_level_order_by(dialect, sql) => {
            format!("{sql} ORDER BY (SELECT NULL) OFFSET {offset} ROWS FETCH NEXT {size} ROWS ONLY")
        }
        Dialect::Mssql | Dialect::Oracle => {
            format!("{sql} OFFSET {offset} ROWS FETCH NEXT {size} ROWS ONLY")
        }
    })
}

fn has_top_level_order_by(dialect: Dialect, sql: &str) -> bool {
    let mut masked = vec![b' '; sql.len()];
    let mut depth = 0u32;
    for_each_code_byte(sql, dialect, |idx, b| match b {
        b'(' => depth += 1,
        b')' => depth = depth.saturating_sub(1),
        _ if depth == 0 => masked[idx] = b,
        _ => {}
    });
    TOP_LEVEL_ORDER_BY.is_match(&masked)
}
