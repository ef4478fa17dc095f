use std::fmt;

use crate::types::RowValues;

/// Hook receiving every statement a data source executes while `show_sql` is on.
pub trait SqlLogger: Send + Sync {
    fn log_sql(&self, sql: &str, params: &[RowValues]);
}

/// Default hook: one `tracing` event per statement on the `sql_dao::sql` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSqlLogger;

impl SqlLogger for TracingSqlLogger {
    fn log_sql(&self, sql: &str, params: &[RowValues]) {
        tracing::info!(target: "sql_dao::sql", sql, params = ?params, "executing statement");
    }
}

impl fmt::Debug for dyn SqlLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SqlLogger")
    }
}
