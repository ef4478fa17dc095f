use std::ops::Range;
use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::error::SqlDaoError;
use crate::statement::Statement;
use crate::types::Dialect;

use super::scanner::for_each_code_byte;

static ORDER_BY: LazyLock<Regex> = LazyLock::new(|| keyword(r"\border\s+by\b"));
static GROUP_BY: LazyLock<Regex> = LazyLock::new(|| keyword(r"\bgroup\s+by\b"));
static FROM: LazyLock<Regex> = LazyLock::new(|| keyword(r"\bfrom\b"));
static DISTINCT: LazyLock<Regex> = LazyLock::new(|| keyword(r"\bdistinct\b"));
static SET_OPERATOR: LazyLock<Regex> =
    LazyLock::new(|| keyword(r"\b(union|intersect|except|minus)\b"));
static LEADING_WITH: LazyLock<Regex> = LazyLock::new(|| keyword(r"^\s*with\b"));

fn keyword(pattern: &str) -> Regex {
    Regex::new(&format!("(?i-u){pattern}")).expect("static keyword pattern")
}

/// Derive the statement counting the rows `sql` would return, for pagination.
///
/// The trailing top-level `ORDER BY` is dropped. Statements using `DISTINCT`, `GROUP BY`, a set
/// operator or a leading `WITH` are wrapped as a sub-select; everything else has its select
/// list replaced by `COUNT(*)`. Keywords inside literals, comments and parentheses are ignored.
/// ```rust
/// use sql_dao::prelude::*;
/// use sql_dao::translation::count_statement;
///
/// let sql = count_statement(Dialect::Mysql, "SELECT a,b FROM t WHERE x=1 ORDER BY a")?;
/// assert_eq!(sql, "SELECT COUNT(*) FROM t WHERE x=1");
/// let sql = count_statement(Dialect::Mysql, "SELECT DISTINCT a FROM t")?;
/// assert_eq!(sql, "SELECT COUNT(*) FROM (SELECT DISTINCT a FROM t) AS sub");
/// # Ok::<(), SqlDaoError>(())
/// ```
///
/// # Errors
/// Returns `SqlDaoError::StatementError` when a statement that would be spliced has no
/// top-level `FROM`.
pub fn count_statement(dialect: Dialect, sql: &str) -> Result<String, SqlDaoError> {
    derive_count(dialect, sql).map(|(count, _)| count)
}

/// Count statement for `stmt` carrying only the values of the placeholders it keeps.
///
/// Placeholders in the dropped select list or `ORDER BY` no longer take a value. When the
/// statement's values do not line up with its `?` placeholders they are passed through as-is.
///
/// ```rust
/// use sql_dao::prelude::*;
/// use sql_dao::translation::count_plan;
///
/// let stmt = Statement::new("SELECT a, ? AS tag FROM t WHERE b = ? ORDER BY field(c, ?)")
///     .param("x")
///     .param(1)
///     .param("y");
/// let counting = count_plan(Dialect::Mysql, &stmt)?;
/// assert_eq!(counting.sql(), "SELECT COUNT(*) FROM t WHERE b = ?");
/// assert_eq!(counting.params(), &[RowValues::Int(1)]);
/// # Ok::<(), SqlDaoError>(())
/// ```
///
/// # Errors
/// Same as [`count_statement`].
pub fn count_plan(dialect: Dialect, stmt: &Statement) -> Result<Statement, SqlDaoError> {
    let (count, kept) = derive_count(dialect, stmt.sql())?;
    let sql = trimmed(stmt.sql());
    let mut before = 0;
    let mut inside = 0;
    let mut total = 0;
    for_each_code_byte(sql, dialect, |idx, b| {
        if b == b'?' {
            total += 1;
            if idx < kept.start {
                before += 1;
            } else if idx < kept.end {
                inside += 1;
            }
        }
    });
    let params = stmt.params();
    let params = if total == params.len() {
        &params[before..before + inside]
    } else {
        params
    };
    Ok(Statement::with_params(count, params.iter().cloned()))
}

fn trimmed(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// Count SQL plus the byte range of the trimmed input it reuses.
fn derive_count(dialect: Dialect, sql: &str) -> Result<(String, Range<usize>), SqlDaoError> {
    let sql = trimmed(sql);
    let masked = mask_nested(sql, dialect);

    let body = match ORDER_BY.find_iter(&masked).last() {
        Some(order_by) => sql[..order_by.start()].trim_end(),
        None => sql,
    };
    let masked_body = &masked[..body.len()];

    let wrap = DISTINCT.is_match(masked_body)
        || GROUP_BY.is_match(masked_body)
        || SET_OPERATOR.is_match(masked_body)
        || LEADING_WITH.is_match(masked_body);
    if wrap {
        let alias = if dialect == Dialect::Oracle { "sub" } else { "AS sub" };
        return Ok((format!("SELECT COUNT(*) FROM ({body}) {alias}"), 0..body.len()));
    }

    let from = FROM.find(masked_body).ok_or_else(|| {
        SqlDaoError::StatementError(format!("cannot derive count statement, no FROM in: {sql}"))
    })?;
    Ok((
        format!("SELECT COUNT(*) {}", &body[from.start()..]),
        from.start()..body.len(),
    ))
}

/// Copy of `sql` with literals, comments and parenthesised text blanked to spaces, so
/// byte offsets found in it are valid in the original.
fn mask_nested(sql: &str, dialect: Dialect) -> Vec<u8> {
    let mut masked = vec![b' '; sql.len()];
    let mut depth = 0u32;
    for_each_code_byte(sql, dialect, |idx, b| match b {
        b'(' => {
            if depth == 0 {
                masked[idx] = b;
            }
            depth += 1;
        }
        b')' => {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                masked[idx] = b;
            }
        }
        _ if depth == 0 => masked[idx] = b,
        _ => {}
    });
    masked
}
