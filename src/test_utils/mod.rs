//! Scripted in-memory driver for exercising transaction ownership and generated SQL without a
//! database.
//!
//! ```rust
//! use std::sync::Arc;
//! use sql_dao::prelude::*;
//! use sql_dao::test_utils::{MockDriver, MockEvent};
//!
//! # async fn demo() -> Result<(), SqlDaoError> {
//! let driver = MockDriver::new("mock");
//! let source = DataSource::builder(DbConfig::new("mock", Dialect::Postgres, "mock://"))
//!     .driver(Arc::new(driver.clone()))
//!     .build()
//!     .await?;
//! let ctx = source.bind_connection(&ExecutionContext::new());
//! run_in_transaction(&ctx, |ctx| async move {
//!     update_statement(&ctx, &Statement::new("DELETE FROM t WHERE id = ?").param(1)).await
//! })
//! .await?;
//! assert_eq!(driver.count(|e| matches!(e, MockEvent::Commit)), 1);
//! # Ok(())
//! # }
//! ```
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::TxOptions;
use crate::driver::{Cursor, Driver, DriverTx, ExecSummary, ResultSet};
use crate::error::SqlDaoError;
use crate::types::RowValues;

/// One call the core made on the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    Ping,
    Begin(Option<TxOptions>),
    Commit,
    Rollback,
    Exec {
        sql: String,
        params: Vec<RowValues>,
        in_tx: bool,
    },
    ExecWithOutput {
        sql: String,
        params: Vec<RowValues>,
        out_name: String,
        in_tx: bool,
    },
    Query {
        sql: String,
        params: Vec<RowValues>,
        in_tx: bool,
    },
}

#[derive(Debug)]
struct MockState {
    events: Vec<MockEvent>,
    results: Vec<(String, ResultSet)>,
    exec_summary: ExecSummary,
    returned_id: Option<i64>,
    fail_ping: bool,
    fail_commit: bool,
    fail_rollback: bool,
    fail_exec: Option<String>,
    io_delay: Option<Duration>,
    begin_delay: Option<Duration>,
    commit_delay: Option<Duration>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            results: Vec::new(),
            exec_summary: ExecSummary {
                rows_affected: Some(1),
                last_insert_id: None,
                returned_id: None,
            },
            returned_id: None,
            fail_ping: false,
            fail_commit: false,
            fail_rollback: false,
            fail_exec: None,
            io_delay: None,
            begin_delay: None,
            commit_delay: None,
        }
    }
}

/// Records every call and answers from a script. Clones share the same script and log.
#[derive(Debug, Clone)]
pub struct MockDriver {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Answer queries whose SQL contains `pattern` with `result`. Earlier scripts win; other
    /// queries return an empty result with no columns.
    #[must_use]
    pub fn on_query(self, pattern: &str, result: ResultSet) -> Self {
        self.state().results.push((pattern.to_string(), result));
        self
    }

    /// Summary returned by every successful exec. Defaults to one affected row.
    #[must_use]
    pub fn exec_summary(self, summary: ExecSummary) -> Self {
        self.state().exec_summary = summary;
        self
    }

    /// Value bound to the output parameter of `exec_with_output`.
    #[must_use]
    pub fn returned_id(self, id: i64) -> Self {
        self.state().returned_id = Some(id);
        self
    }

    #[must_use]
    pub fn fail_ping(self) -> Self {
        self.state().fail_ping = true;
        self
    }

    #[must_use]
    pub fn fail_commit(self) -> Self {
        self.state().fail_commit = true;
        self
    }

    #[must_use]
    pub fn fail_rollback(self) -> Self {
        self.state().fail_rollback = true;
        self
    }

    /// Fail execs whose SQL contains `pattern`.
    #[must_use]
    pub fn fail_exec_matching(self, pattern: &str) -> Self {
        self.state().fail_exec = Some(pattern.to_string());
        self
    }

    /// Delay every exec and query, for cancellation and timeout tests.
    #[must_use]
    pub fn io_delay(self, delay: Duration) -> Self {
        self.state().io_delay = Some(delay);
        self
    }

    /// Delay `begin` after recording it; the transaction exists only once the delay ends.
    #[must_use]
    pub fn begin_delay(self, delay: Duration) -> Self {
        self.state().begin_delay = Some(delay);
        self
    }

    /// Delay `commit` after recording it.
    #[must_use]
    pub fn commit_delay(self, delay: Duration) -> Self {
        self.state().commit_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn events(&self) -> Vec<MockEvent> {
        self.state().events.clone()
    }

    #[must_use]
    pub fn count(&self, pred: impl Fn(&MockEvent) -> bool) -> usize {
        self.state().events.iter().filter(|e| pred(e)).count()
    }

    /// SQL of every exec and query, in call order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                MockEvent::Exec { sql, .. }
                | MockEvent::ExecWithOutput { sql, .. }
                | MockEvent::Query { sql, .. } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn record(state: &Mutex<MockState>, event: MockEvent) {
    lock(state).events.push(event);
}

async fn delay(state: &Mutex<MockState>) {
    let pause = lock(state).io_delay;
    pause_for(pause).await;
}

async fn pause_for(pause: Option<Duration>) {
    if let Some(pause) = pause {
        tokio::time::sleep(pause).await;
    }
}

async fn mock_exec(
    state: &Mutex<MockState>,
    sql: &str,
    args: &[RowValues],
    in_tx: bool,
) -> Result<ExecSummary, SqlDaoError> {
    record(
        state,
        MockEvent::Exec {
            sql: sql.to_string(),
            params: args.to_vec(),
            in_tx,
        },
    );
    delay(state).await;
    let guard = lock(state);
    if guard.fail_exec.as_deref().is_some_and(|p| sql.contains(p)) {
        return Err(SqlDaoError::ExecutionError(format!("scripted failure for {sql}")));
    }
    Ok(guard.exec_summary)
}

async fn mock_exec_with_output(
    state: &Mutex<MockState>,
    sql: &str,
    args: &[RowValues],
    out_name: &str,
    in_tx: bool,
) -> Result<ExecSummary, SqlDaoError> {
    record(
        state,
        MockEvent::ExecWithOutput {
            sql: sql.to_string(),
            params: args.to_vec(),
            out_name: out_name.to_string(),
            in_tx,
        },
    );
    delay(state).await;
    let guard = lock(state);
    Ok(ExecSummary {
        returned_id: guard.returned_id,
        ..guard.exec_summary
    })
}

async fn mock_query(
    state: &Mutex<MockState>,
    sql: &str,
    args: &[RowValues],
    in_tx: bool,
) -> Result<Box<dyn Cursor>, SqlDaoError> {
    record(
        state,
        MockEvent::Query {
            sql: sql.to_string(),
            params: args.to_vec(),
            in_tx,
        },
    );
    delay(state).await;
    let result = lock(state)
        .results
        .iter()
        .find(|(pattern, _)| sql.contains(pattern.as_str()))
        .map(|(_, rs)| rs.clone())
        .unwrap_or_default();
    Ok(Box::new(result.into_cursor()))
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<(), SqlDaoError> {
        record(&self.state, MockEvent::Ping);
        if self.state().fail_ping {
            return Err(SqlDaoError::ConnectionError("scripted ping failure".into()));
        }
        Ok(())
    }

    async fn begin(&self, options: Option<&TxOptions>) -> Result<Box<dyn DriverTx>, SqlDaoError> {
        record(&self.state, MockEvent::Begin(options.copied()));
        let pause = self.state().begin_delay;
        pause_for(pause).await;
        Ok(Box::new(MockTx {
            state: Arc::clone(&self.state),
            finished: false,
        }))
    }

    async fn exec(&self, sql: &str, args: &[RowValues]) -> Result<ExecSummary, SqlDaoError> {
        mock_exec(&self.state, sql, args, false).await
    }

    async fn exec_with_output(
        &self,
        sql: &str,
        args: &[RowValues],
        out_name: &str,
    ) -> Result<ExecSummary, SqlDaoError> {
        mock_exec_with_output(&self.state, sql, args, out_name, false).await
    }

    async fn query(&self, sql: &str, args: &[RowValues]) -> Result<Box<dyn Cursor>, SqlDaoError> {
        mock_query(&self.state, sql, args, false).await
    }
}

/// Transaction handed out by [`MockDriver`]. Dropping it unfinished records a rollback.
struct MockTx {
    state: Arc<Mutex<MockState>>,
    finished: bool,
}

#[async_trait]
impl DriverTx for MockTx {
    async fn exec(&mut self, sql: &str, args: &[RowValues]) -> Result<ExecSummary, SqlDaoError> {
        mock_exec(&self.state, sql, args, true).await
    }

    async fn exec_with_output(
        &mut self,
        sql: &str,
        args: &[RowValues],
        out_name: &str,
    ) -> Result<ExecSummary, SqlDaoError> {
        mock_exec_with_output(&self.state, sql, args, out_name, true).await
    }

    async fn query(
        &mut self,
        sql: &str,
        args: &[RowValues],
    ) -> Result<Box<dyn Cursor>, SqlDaoError> {
        mock_query(&self.state, sql, args, true).await
    }

    async fn commit(mut self: Box<Self>) -> Result<(), SqlDaoError> {
        self.finished = true;
        record(&self.state, MockEvent::Commit);
        let pause = lock(&self.state).commit_delay;
        pause_for(pause).await;
        if lock(&self.state).fail_commit {
            return Err(SqlDaoError::CommitError("scripted commit failure".into()));
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), SqlDaoError> {
        self.finished = true;
        record(&self.state, MockEvent::Rollback);
        if lock(&self.state).fail_rollback {
            return Err(SqlDaoError::RollbackError("scripted rollback failure".into()));
        }
        Ok(())
    }
}

impl Drop for MockTx {
    fn drop(&mut self) {
        if !self.finished {
            record(&self.state, MockEvent::Rollback);
        }
    }
}
