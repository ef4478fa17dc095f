//! `SQLite` driver over a `bb8` pool of `rusqlite` connections.
//!
//! Blocking rusqlite calls run on tokio's blocking pool. Every statement outside a transaction
//! checks out its own connection; a transaction keeps one connection from `BEGIN` until it
//! commits, rolls back or is dropped. File databases run in WAL mode so readers are not blocked
//! by an open writer.
//!
//! `:memory:` opens a shared-cache in-memory database private to this driver, so every pooled
//! connection sees the same tables. Shared-cache locking is per table: a statement touching a
//! table written by another connection's open transaction fails with `SQLITE_LOCKED` instead
//! of waiting. Use a file database when transactions run concurrently with other work.
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bb8::{ManageConnection, Pool, PooledConnection, RunError};
use rusqlite::types::Value;
use tokio::sync::Mutex;

use super::{ColumnType, Cursor, Driver, DriverTx, ExecSummary, ResultSet};
use crate::config::{PoolLimits, TxOptions};
use crate::error::SqlDaoError;
use crate::types::RowValues;

pub(crate) type SharedConnection = Arc<Mutex<rusqlite::Connection>>;

type PooledSqlite = PooledConnection<'static, SqliteManager>;

static MEMORY_DATABASES: AtomicUsize = AtomicUsize::new(0);

/// How long a writer waits for another connection's write lock before failing with `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// bb8 manager for rusqlite connections.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    path: String,
}

impl SqliteManager {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl ManageConnection for SqliteManager {
    type Connection = SharedConnection;
    type Error = SqlDaoError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let path = self.path.clone();
        async move { open_connection(path).await }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let conn = Arc::clone(conn);
        async move {
            run_blocking(conn, |c| {
                c.query_row("SELECT 1", [], |_| Ok(()))?;
                Ok(())
            })
            .await
        }
    }

    /// A connection still busy on the blocking pool, or still inside a transaction, is not
    /// handed out again.
    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.try_lock().map_or(true, |c| !c.is_autocommit())
    }
}

async fn open_connection(path: String) -> Result<SharedConnection, SqlDaoError> {
    let conn = tokio::task::spawn_blocking(move || {
        let conn = rusqlite::Connection::open(&path)
            .map_err(|e| SqlDaoError::ConnectionError(format!("sqlite open {path}: {e}")))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok::<_, SqlDaoError>(conn)
    })
    .await
    .map_err(|e| SqlDaoError::ConnectionError(format!("sqlite open join error: {e}")))??;
    Ok(Arc::new(Mutex::new(conn)))
}

fn is_memory(path: &str) -> bool {
    let path = path.trim();
    path.is_empty() || path == ":memory:"
}

pub struct SqliteDriver {
    pool: Pool<SqliteManager>,
    path: String,
    /// Keeps a shared in-memory database alive while pooled connections come and go.
    _anchor: Option<SharedConnection>,
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("path", &self.path)
            .field("state", &self.pool.state())
            .finish_non_exhaustive()
    }
}

impl SqliteDriver {
    /// Open a pool on the database at `path` (`:memory:` for a private in-memory database).
    ///
    /// `max_open` bounds the pool and `max_lifetime` retires old connections. bb8 has no idle
    /// cap; idle connections close after its idle timeout and `max_idle` is not applied.
    ///
    /// # Errors
    /// Returns `SqlDaoError::ConnectionError` when the database cannot be opened.
    pub async fn open(path: &str, limits: PoolLimits) -> Result<Self, SqlDaoError> {
        let memory = is_memory(path);
        let target = if memory {
            let n = MEMORY_DATABASES.fetch_add(1, Ordering::Relaxed);
            format!("file:sql_dao_mem_{}_{n}?mode=memory&cache=shared", std::process::id())
        } else {
            path.to_string()
        };

        let anchor = if memory {
            Some(open_connection(target.clone()).await?)
        } else {
            let first = open_connection(target.clone()).await?;
            run_blocking(first, |c| {
                c.execute_batch("PRAGMA journal_mode = WAL;")?;
                Ok(())
            })
            .await?;
            None
        };

        let max_size = limits.max_open.max(1);
        let pool = Pool::builder()
            .max_size(max_size)
            .max_lifetime(Some(limits.max_lifetime).filter(|d| !d.is_zero()))
            .build(SqliteManager::new(target.clone()))
            .await?;
        tracing::debug!(
            path,
            max_size,
            max_lifetime_secs = limits.max_lifetime.as_secs(),
            "sqlite pool ready"
        );
        Ok(Self {
            pool,
            path: target,
            _anchor: anchor,
        })
    }

    async fn checkout(&self) -> Result<PooledSqlite, SqlDaoError> {
        self.pool.get_owned().await.map_err(|e| match e {
            RunError::User(e) => e,
            RunError::TimedOut => {
                SqlDaoError::ConnectionError("timed out waiting for a sqlite connection".into())
            }
        })
    }
}

pub(crate) async fn run_blocking<F, R>(conn: SharedConnection, func: F) -> Result<R, SqlDaoError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlDaoError> + Send + 'static,
    R: Send + 'static,
{
    // Locked before dispatch: an abandoned caller leaves the lock with the blocking task, so
    // nothing else touches the connection until the statement has finished.
    let mut guard = conn.lock_owned().await;
    tokio::task::spawn_blocking(move || func(&mut guard))
        .await
        .map_err(|e| SqlDaoError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}

/// Convert a single `RowValues` to a rusqlite `Value`.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

fn convert_params(params: &[RowValues]) -> Vec<Value> {
    params.iter().map(row_value_to_sqlite_value).collect()
}

fn extract_value(row: &rusqlite::Row<'_>, idx: usize) -> Result<RowValues, SqlDaoError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

fn exec_sync(
    conn: &mut rusqlite::Connection,
    sql: &str,
    params: &[Value],
) -> Result<ExecSummary, SqlDaoError> {
    let changed = {
        let mut stmt = conn.prepare(sql)?;
        stmt.execute(rusqlite::params_from_iter(params.iter()))?
    };
    Ok(ExecSummary {
        rows_affected: u64::try_from(changed).ok(),
        last_insert_id: Some(conn.last_insert_rowid()),
        returned_id: None,
    })
}

fn query_sync(
    conn: &mut rusqlite::Connection,
    sql: &str,
    params: &[Value],
) -> Result<ResultSet, SqlDaoError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<ColumnType> = stmt
        .columns()
        .iter()
        .map(|c| ColumnType::new(c.name(), c.decl_type().unwrap_or_default()))
        .collect();
    let width = columns.len();
    let mut result_set = ResultSet::new(columns);

    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        let mut row_values = Vec::with_capacity(width);
        for idx in 0..width {
            row_values.push(extract_value(row, idx)?);
        }
        result_set.add_row_values(row_values);
    }
    Ok(result_set)
}

async fn exec_on(
    conn: SharedConnection,
    sql: &str,
    args: &[RowValues],
) -> Result<ExecSummary, SqlDaoError> {
    let sql = sql.to_string();
    let params = convert_params(args);
    run_blocking(conn, move |c| exec_sync(c, &sql, &params)).await
}

async fn query_on(
    conn: SharedConnection,
    sql: &str,
    args: &[RowValues],
) -> Result<Box<dyn Cursor>, SqlDaoError> {
    let sql = sql.to_string();
    let params = convert_params(args);
    let result_set = run_blocking(conn, move |c| query_sync(c, &sql, &params)).await?;
    Ok(Box::new(result_set.into_cursor()))
}

#[async_trait]
impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn ping(&self) -> Result<(), SqlDaoError> {
        let conn = self.checkout().await?;
        run_blocking(Arc::clone(&*conn), |c| {
            c.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    async fn begin(&self, options: Option<&TxOptions>) -> Result<Box<dyn DriverTx>, SqlDaoError> {
        let conn = self.checkout().await?;
        let begin = if options.is_some_and(|o| o.read_only) {
            "BEGIN DEFERRED"
        } else {
            "BEGIN IMMEDIATE"
        };
        let tx = SqliteTx { conn: Some(conn) };
        // From here on a dropped `tx` rolls back whatever BEGIN managed to open.
        run_blocking(tx.shared()?, move |c| {
            c.execute_batch(begin)?;
            Ok(())
        })
        .await?;
        Ok(Box::new(tx))
    }

    async fn exec(&self, sql: &str, args: &[RowValues]) -> Result<ExecSummary, SqlDaoError> {
        let conn = self.checkout().await?;
        exec_on(Arc::clone(&*conn), sql, args).await
    }

    async fn query(&self, sql: &str, args: &[RowValues]) -> Result<Box<dyn Cursor>, SqlDaoError> {
        let conn = self.checkout().await?;
        query_on(Arc::clone(&*conn), sql, args).await
    }
}

/// Open `SQLite` transaction holding its pooled connection; `conn` is `None` once finished.
struct SqliteTx {
    conn: Option<PooledSqlite>,
}

impl SqliteTx {
    fn shared(&self) -> Result<SharedConnection, SqlDaoError> {
        self.conn
            .as_ref()
            .map(|c| Arc::clone(&**c))
            .ok_or_else(|| SqlDaoError::InvalidUsage("sqlite transaction already finished".into()))
    }

    async fn finish(mut self: Box<Self>, sql: &'static str) -> Result<(), SqlDaoError> {
        run_blocking(self.shared()?, move |c| {
            c.execute_batch(sql)?;
            Ok(())
        })
        .await?;
        self.conn.take();
        Ok(())
    }
}

#[async_trait]
impl DriverTx for SqliteTx {
    async fn exec(&mut self, sql: &str, args: &[RowValues]) -> Result<ExecSummary, SqlDaoError> {
        exec_on(self.shared()?, sql, args).await
    }

    async fn query(
        &mut self,
        sql: &str,
        args: &[RowValues],
    ) -> Result<Box<dyn Cursor>, SqlDaoError> {
        query_on(self.shared()?, sql, args).await
    }

    async fn commit(self: Box<Self>) -> Result<(), SqlDaoError> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<(), SqlDaoError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let shared = Arc::clone(&*conn);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || {
                    let guard = shared.blocking_lock();
                    if !guard.is_autocommit()
                        && let Err(e) = guard.execute_batch("ROLLBACK")
                    {
                        tracing::warn!(error = %e, "rollback of dropped sqlite transaction failed");
                    }
                    drop(guard);
                    // returned only now, so the pool never sees it mid-rollback
                    drop(conn);
                });
            }
            Err(_) => {
                match shared.try_lock() {
                    Ok(guard) if !guard.is_autocommit() => {
                        if let Err(e) = guard.execute_batch("ROLLBACK") {
                            tracing::warn!(error = %e, "rollback of dropped sqlite transaction failed");
                        }
                    }
                    Ok(_) => {}
                    Err(_) => tracing::warn!("sqlite transaction dropped outside a runtime while busy"),
                }
                drop(conn);
            }
        }
    }
}
