use std::borrow::Cow;

use crate::translation::rewrite_placeholders;
use crate::types::{Dialect, RowValues};

pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// SQL text with `?` placeholders plus everything needed to run and count it.
///
/// ```rust
/// use sql_dao::prelude::*;
///
/// let stmt = Statement::new("SELECT id, name FROM t_user WHERE 1=1")
///     .append(" AND name LIKE ?", [RowValues::Text("a%".into())])
///     .append(" AND age > ?", [RowValues::Int(18)]);
/// assert_eq!(stmt.params().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<RowValues>,
    count_statement: Option<Box<Statement>>,
    select_total_count: bool,
}

impl Statement {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            count_statement: None,
            select_total_count: true,
        }
    }

    #[must_use]
    pub fn with_params(sql: impl Into<String>, params: impl IntoIterator<Item = RowValues>) -> Self {
        Self::new(sql).params_extended(params)
    }

    /// Append a SQL fragment and the values of the placeholders it introduces.
    #[must_use]
    pub fn append(
        mut self,
        fragment: &str,
        params: impl IntoIterator<Item = RowValues>,
    ) -> Self {
        self.sql.push_str(fragment);
        self.params_extended(params)
    }

    #[must_use]
    pub fn param(mut self, value: impl Into<RowValues>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Use `count` instead of a derived statement when a total count is requested.
    ///
    /// The derived count drops the select list and trailing `ORDER BY` along with the values
    /// of their `?` placeholders. Values that do not line up one-to-one with the `?`
    /// placeholders are passed through whole, so such statements need a count of their own.
    #[must_use]
    pub fn count_statement(mut self, count: Statement) -> Self {
        self.count_statement = Some(Box::new(count));
        self
    }

    /// Whether a paged query also computes the total row count (on by default).
    #[must_use]
    pub fn select_total_count(mut self, enabled: bool) -> Self {
        self.select_total_count = enabled;
        self
    }

    fn params_extended(mut self, params: impl IntoIterator<Item = RowValues>) -> Self {
        self.params.extend(params);
        self
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn params(&self) -> &[RowValues] {
        &self.params
    }

    #[must_use]
    pub fn custom_count_statement(&self) -> Option<&Statement> {
        self.count_statement.as_deref()
    }

    #[must_use]
    pub fn wants_total_count(&self) -> bool {
        self.select_total_count
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

/// Generated SQL with `?` placeholders and their values in bind order.
///
/// ```rust
/// use sql_dao::StatementPlan;
/// use sql_dao::prelude::*;
///
/// let plan = StatementPlan {
///     qmark_sql: "DELETE FROM t WHERE id = ?".into(),
///     params: vec![RowValues::Int(3)],
/// };
/// assert_eq!(plan.native_sql(Dialect::Oracle), "DELETE FROM t WHERE id = :1");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StatementPlan {
    pub qmark_sql: String,
    pub params: Vec<RowValues>,
}

impl StatementPlan {
    /// The SQL with placeholders in the native style of `dialect`.
    #[must_use]
    pub fn native_sql(&self, dialect: Dialect) -> Cow<'_, str> {
        rewrite_placeholders(dialect, &self.qmark_sql)
    }
}

/// Page request for list queries; `total_count` is filled in when counting is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number.
    pub page_no: u64,
    pub page_size: u64,
    pub total_count: Option<u64>,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            page_no: 1,
            page_size: DEFAULT_PAGE_SIZE,
            total_count: None,
        }
    }
}

impl Page {
    #[must_use]
    pub fn new(page_no: u64, page_size: u64) -> Self {
        Page {
            page_no,
            page_size,
            total_count: None,
        }
    }

    /// Rows skipped before this page starts.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.page_no.max(1).saturating_sub(1).saturating_mul(self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_sql_and_params() {
        let stmt = Statement::new("SELECT * FROM t WHERE 1=1")
            .append(" AND a = ?", [RowValues::Int(1)])
            .append(" AND b IN (?, ?)", [RowValues::Int(2), RowValues::Int(3)])
            .param("tail");
        assert_eq!(stmt.sql(), "SELECT * FROM t WHERE 1=1 AND a = ? AND b IN (?, ?)");
        assert_eq!(stmt.params().len(), 4);
        assert!(stmt.wants_total_count());
        assert!(stmt.custom_count_statement().is_none());
    }

    #[test]
    fn page_offsets() {
        assert_eq!(Page::default().offset(), 0);
        assert_eq!(Page::new(3, 10).offset(), 20);
        assert_eq!(Page::new(0, 10).offset(), 0);
    }

    #[test]
    fn plans_render_native_placeholders() {
        let plan = StatementPlan {
            qmark_sql: "UPDATE t SET a = ? WHERE id = ?".into(),
            params: vec![RowValues::Int(1), RowValues::Int(2)],
        };
        assert_eq!(plan.native_sql(Dialect::Postgres), "UPDATE t SET a = $1 WHERE id = $2");
        assert_eq!(plan.native_sql(Dialect::Mssql), "UPDATE t SET a = @p1 WHERE id = @p2");
        assert_eq!(plan.native_sql(Dialect::Sqlite), plan.qmark_sql);
    }
}
